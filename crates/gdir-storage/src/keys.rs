use gdir_types::{ClusterId, DirectoryKey, GrainId, ProviderId, SiloAddress};

// Every variable-length component is written as `len_be_u32(4) ++ bytes`, so
// a prefix made of whole components never matches a longer component that
// merely starts with the same bytes.

fn push_segment(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Prefix shared by all rows of one `(cluster, provider)` directory.
pub fn scope_prefix(cluster_id: &ClusterId, provider_id: &ProviderId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + cluster_id.0.len() + provider_id.0.len());
    push_segment(&mut buf, cluster_id.0.as_bytes());
    push_segment(&mut buf, provider_id.0.as_bytes());
    buf
}

fn grain_suffix(grain_id: &GrainId) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + grain_id.grain_type.0.len() + grain_id.key.len());
    push_segment(&mut buf, grain_id.grain_type.0.as_bytes());
    push_segment(&mut buf, grain_id.key.as_bytes());
    buf
}

/// `entries` keyspace: `scope ++ grain_type ++ grain_key`
pub fn entry_key(key: &DirectoryKey) -> Vec<u8> {
    let mut buf = scope_prefix(&key.cluster_id, &key.provider_id);
    buf.extend_from_slice(&grain_suffix(&key.grain_id));
    buf
}

/// `owners` keyspace prefix for one silo: `scope ++ endpoint ++ generation(8)`
pub fn owner_prefix(cluster_id: &ClusterId, provider_id: &ProviderId, silo: &SiloAddress) -> Vec<u8> {
    let mut buf = scope_prefix(cluster_id, provider_id);
    push_segment(&mut buf, silo.endpoint.to_string().as_bytes());
    buf.extend_from_slice(&silo.generation.to_be_bytes());
    buf
}

/// `owners` keyspace: `owner_prefix ++ grain_type ++ grain_key` → b""
///
/// The grain suffix is shared with `entry_key`, so an owner key maps back to
/// its entry key as `scope ++ owner_key[owner_prefix.len()..]`.
pub fn owner_key(key: &DirectoryKey, silo: &SiloAddress) -> Vec<u8> {
    let mut buf = owner_prefix(&key.cluster_id, &key.provider_id, silo);
    buf.extend_from_slice(&grain_suffix(&key.grain_id));
    buf
}

/// `meta` keyspace: `label_utf8`
pub fn meta_key(label: &str) -> Vec<u8> {
    label.as_bytes().to_vec()
}
