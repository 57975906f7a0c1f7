fn main() -> Result<(), Box<dyn std::error::Error>> {
    // autometrics picks the sha/branch up for its build_info metric
    vergen::EmitBuilder::builder().git_sha(true).git_branch().emit()?;
    Ok(())
}
