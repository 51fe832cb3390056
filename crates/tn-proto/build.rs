fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Ensure a working `protoc` is available (vendored) to avoid external toolchain dependency.
    let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
    unsafe {
        std::env::set_var("PROTOC", protoc_path);
    }
    let include_path = protoc_bin_vendored::include_path()?;

    // The client needs both halves: the client stub for the session and the
    // server trait for in-process test servers.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["proto/model.proto"],
            &["proto", &include_path.to_string_lossy()],
        )?;
    println!("cargo:rerun-if-changed=proto/model.proto");
    Ok(())
}
