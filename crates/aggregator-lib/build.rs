//! Build script for generating protobuf code
//!
//! Generates the ingestion service code from `proto/flows/v1/flows.proto`.
//! Generation only runs with the `proto-gen` feature and when protoc is
//! available; otherwise the checked-in definitions in `src/proto` are used.

use std::path::PathBuf;
use std::process::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/flows/v1/flows.proto");

    if std::env::var("CARGO_FEATURE_PROTO_GEN").is_err() {
        return Ok(());
    }

    let protoc_available =
        std::env::var("PROTOC").is_ok() || Command::new("protoc").arg("--version").output().is_ok();

    if !protoc_available {
        println!("cargo:warning=protoc not found, skipping proto generation");
        println!("cargo:warning=Install protoc or set PROTOC env var to generate proto code");
        return Ok(());
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    // The aggregator serves node connections and the client is used by tests and tools
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .out_dir(&out_dir)
        .compile(&["proto/flows/v1/flows.proto"], &["proto"])?;

    Ok(())
}
