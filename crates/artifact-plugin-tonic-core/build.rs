/// Builds the gRPC client and server code for `proto/artifact.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The `data` field of `OpenStreamResponse` is marked with `.bytes(...)` so it
/// is generated as `bytes::Bytes` instead of `Vec<u8>`. Each 1 MiB chunk read
/// from storage is frozen once and handed to the encoder without a copy.
///
/// # Files and Paths
///
/// - Proto file: `proto/artifact.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/artifact_descriptor.bin`, exported for gRPC
///   reflection.
///
/// # Output
///
/// ```rust,ignore
/// pub mod proto {
///     tonic::include_proto!("artifact.v1");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("artifact_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/artifact.proto");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".artifact.v1.OpenStreamResponse.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/artifact.proto"], &["proto"])
        .unwrap();
}
