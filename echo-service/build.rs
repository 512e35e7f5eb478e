use prost::Message;
use std::env::var;
use std::fs;
use std::io::Result;

fn main() -> Result<()> {
    // Services
    let proto_files = &["echo.proto"];

    // Name of the folder containing the proto definitions
    let proto_folder = "proto";
    let out_dir = var("OUT_DIR").expect("Missing OUT_DIR environment variable");
    let descriptors_path = format!("{}/descriptors.bin", out_dir);

    println!("cargo:rerun-if-changed={proto_folder}");

    // protox compiles the sources in-process, imports included,
    // so the fixture builds without a system protoc.
    let file_descriptors =
        protox::compile(proto_files, [proto_folder]).expect("Failed to compile echo protos");

    fs::write(&descriptors_path, file_descriptors.encode_to_vec())?;

    tonic_prost_build::configure()
        .build_client(false)
        .compile_fds(file_descriptors)?;

    Ok(())
}
