//! Build script to generate the C header using cbindgen

fn main() {
    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let output_dir = std::path::Path::new(&crate_dir).join("..").join("..").join("include");

    std::fs::create_dir_all(&output_dir).ok();

    let output_file = output_dir.join("jobns.h");

    let config = cbindgen::Config::from_file("cbindgen.toml").unwrap_or_default();

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(&output_file);
        }
        Err(e) => println!("cargo:warning=unable to generate C bindings: {e}"),
    }

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");
}
