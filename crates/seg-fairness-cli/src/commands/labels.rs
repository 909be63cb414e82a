//! Label catalog command.

use anyhow::Result;

use super::parse_anatomy;

pub fn run(anatomy: &str) -> Result<()> {
    let catalog = parse_anatomy(anatomy)?.catalog();

    println!("{} ({} classes)", catalog.anatomy().title(), catalog.class_count());
    for (id, name) in catalog.classes() {
        println!("  {id:>2}  {name}");
    }
    Ok(())
}
