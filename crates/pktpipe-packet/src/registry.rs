//! Type id to packet factory mapping.
//!
//! Both ends of a channel must register the same kinds under the same ids.
//! A mismatch surfaces as [`PacketError::UnknownPacketType`] on the
//! receiving side, never as a corrupted decode.

use std::collections::HashMap;

use crate::error::{PacketError, Result};
use crate::kind::{
    DataPacket, GZipPacket, IntPacket, LongPacket, PacketKind, ShortPacket, StringPacket,
    UIntPacket, ULongPacket, UShortPacket,
};
use crate::packet::Packet;

type Factory = Box<dyn Fn() -> Packet + Send + Sync>;

/// Creates empty packets by wire type id.
#[derive(Default)]
pub struct PacketRegistry {
    factories: HashMap<i32, Factory>,
}

impl PacketRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with every built-in kind.
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.register_kind::<StringPacket>();
        registry.register_kind::<IntPacket>();
        registry.register_kind::<ShortPacket>();
        registry.register_kind::<LongPacket>();
        registry.register_kind::<UIntPacket>();
        registry.register_kind::<UShortPacket>();
        registry.register_kind::<ULongPacket>();
        registry.register_kind::<DataPacket>();
        registry.register_kind::<GZipPacket>();
        registry
    }

    /// Register a factory for `type_id`, replacing any previous one.
    ///
    /// Returns true if a factory was replaced.
    pub fn register<F>(&mut self, type_id: i32, factory: F) -> bool
    where
        F: Fn() -> Packet + Send + Sync + 'static,
    {
        self.factories.insert(type_id, Box::new(factory)).is_some()
    }

    /// Register kind `K` under its own type id.
    pub fn register_kind<K: PacketKind>(&mut self) -> bool {
        self.register(K::TYPE_ID, || Packet::new(K::default()))
    }

    /// Remove the factory for `type_id`.
    pub fn unregister(&mut self, type_id: i32) -> bool {
        self.factories.remove(&type_id).is_some()
    }

    /// Create a fresh, empty packet for `type_id`.
    pub fn create(&self, type_id: i32) -> Result<Packet> {
        let factory = self
            .factories
            .get(&type_id)
            .ok_or(PacketError::UnknownPacketType(type_id))?;
        let packet = factory();
        if packet.type_id() != type_id {
            return Err(PacketError::KindMismatch {
                registered: type_id,
                created: packet.type_id(),
            });
        }
        Ok(packet)
    }

    pub fn contains(&self, type_id: i32) -> bool {
        self.factories.contains_key(&type_id)
    }

    /// Registered type ids, ascending.
    pub fn type_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.factories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRegistry")
            .field("type_ids", &self.type_ids())
            .finish()
    }
}
