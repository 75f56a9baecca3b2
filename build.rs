fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::env::var("OUT_DIR")?;

    tonic_build::configure()
        .file_descriptor_set_path(format!("{out_dir}/chord_descriptor.bin"))
        .compile(&["proto/chord.proto"], &["proto"])?;

    tonic_build::configure()
        .file_descriptor_set_path(format!("{out_dir}/namedir_descriptor.bin"))
        .compile(&["proto/namedir.proto"], &["proto"])?;

    tonic_build::configure()
        .file_descriptor_set_path(format!("{out_dir}/mapreduce_descriptor.bin"))
        .compile(&["proto/mapreduce.proto"], &["proto"])?;

    Ok(())
}
