pub mod v1 {
    tonic::include_proto!("graindir.v1");
}

/// Encoded descriptor set for gRPC server reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/descriptor.bin"));
