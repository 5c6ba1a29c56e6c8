use meshim_naming::ServiceRegistration;
use meshim_packet::Header;

/// Chooses one instance of a service for a packet.
pub trait Selector: Send + Sync {
    /// Id of the chosen instance, or `None` when `services` is empty.
    fn lookup(&self, header: &Header, services: &[ServiceRegistration]) -> Option<String>;
}

/// CRC32 of the channel id modulo the number of candidates.
///
/// The mapping is stable for a fixed candidate list. It is not consistent
/// hashing: adding or removing one instance can move many channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashSelector;

/// IEEE CRC32 of `key`.
pub fn hash_code(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

impl Selector for HashSelector {
    fn lookup(&self, header: &Header, services: &[ServiceRegistration]) -> Option<String> {
        if services.is_empty() {
            return None;
        }
        let index = hash_code(&header.channel_id) as usize % services.len();
        Some(services[index].id.clone())
    }
}
