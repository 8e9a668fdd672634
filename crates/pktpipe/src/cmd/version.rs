use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("pktpipe {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!("protocol: {}", pktpipe_packet::PROTOCOL_VERSION);
    println!(
        "minimum_protocol: {}",
        pktpipe_packet::MINIMUM_SUPPORTED_VERSION
    );
    println!(
        "max_split_fragments: {}",
        pktpipe_packet::MAX_SPLIT_FRAGMENTS
    );
    println!(
        "target: {}",
        option_env!("PKTPIPE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("PKTPIPE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("features: endpoint={}, cli=true", cfg!(feature = "endpoint"));

    Ok(SUCCESS)
}
