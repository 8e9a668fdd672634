//! Built-in packet type ids.
//!
//! Type ids 0-255 are reserved for built-in kinds.
//! Type ids 256 and above are available for application-defined kinds.

/// UTF-8 text.
pub const STRING: i32 = 1;

/// Signed 32-bit integer.
pub const INT: i32 = 2;

/// Signed 16-bit integer.
pub const SHORT: i32 = 3;

/// Signed 64-bit integer.
pub const LONG: i32 = 4;

/// Unsigned 32-bit integer.
pub const UINT: i32 = 5;

/// Unsigned 16-bit integer.
pub const USHORT: i32 = 6;

/// Unsigned 64-bit integer.
pub const ULONG: i32 = 7;

/// Opaque bytes.
pub const DATA: i32 = 8;

/// Gzip-compressed bytes.
pub const GZIP: i32 = 100;

/// First application-defined type id.
pub const USER_TYPE_START: i32 = 256;

/// Returns a human-readable name for a packet type id.
pub fn type_name(id: i32) -> &'static str {
    match id {
        STRING => "STRING",
        INT => "INT",
        SHORT => "SHORT",
        LONG => "LONG",
        UINT => "UINT",
        USHORT => "USHORT",
        ULONG => "ULONG",
        DATA => "DATA",
        GZIP => "GZIP",
        0..=255 => "RESERVED",
        _ => "USER",
    }
}

/// Returns true if the type id is in the reserved range.
pub fn is_reserved(id: i32) -> bool {
    (0..USER_TYPE_START).contains(&id)
}

/// Returns true if the type id belongs to a built-in kind.
pub fn is_builtin(id: i32) -> bool {
    (STRING..=DATA).contains(&id) || id == GZIP
}
