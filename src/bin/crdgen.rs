fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", backup_operator::crd::generate_crds()?);
    Ok(())
}
