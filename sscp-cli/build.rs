use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Emit the default 'cargo:' instruction output.  Only the cargo build metadata is used, since
    // git metadata isn't available when the crate is compiled from crates.io by `cargo install`
    EmitBuilder::builder().all_cargo().emit()?;

    Ok(())
}
