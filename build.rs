fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Generated code is checked in under src/proto; regenerate with `--features gen-proto`.
    #[cfg(feature = "gen-proto")]
    tonic_build::configure()
        .out_dir("src/proto")
        .compile_protos(&["proto/coordinator.proto"], &["proto"])?;
    Ok(())
}
