//! `chainstream inspect-package`: print a package's modules and types.

use anyhow::{Context, Result};

use chainstream_core::package::load_package;
use chainstream_core::registry::TypeRegistry;

pub async fn run(reference: &str, as_json: bool) -> Result<()> {
    let package = load_package(reference)
        .await
        .with_context(|| format!("loading package '{reference}'"))?;
    let registry = TypeRegistry::from_package(&package)
        .with_context(|| format!("package '{reference}' has an invalid schema"))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&package)?);
        return Ok(());
    }

    println!("Package:  {} {}", package.name, package.version);
    if !package.network.is_empty() {
        println!("Network:  {}", package.network);
    }
    println!("\nModules:");
    for module in &package.modules {
        let marker = if registry.contains(&module.output_type) { "✓" } else { "✗" };
        println!("  {marker} {:30} → {}", module.name, module.output_type);
    }
    println!("\nTypes:");
    for schema in &package.types {
        println!("  {}", schema.name);
        for field in &schema.fields {
            let kind = if field.repeated {
                format!("repeated {}", field.kind)
            } else {
                field.kind.clone()
            };
            println!("    {:20} {}", field.name, kind);
        }
    }
    Ok(())
}
