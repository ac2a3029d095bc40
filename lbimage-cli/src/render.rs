//! Human-readable output for install, list and removal results

use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use lbimage_core::{InstallOutcome, Inventory, RemovalReport};

/// Table row for installed images
#[derive(Tabled)]
struct ImageRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Image ID")]
    image_id: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

pub fn print_install(outcome: &InstallOutcome) {
    println!(
        "Installed load balancer image {} (version {})",
        outcome.image_id, outcome.version
    );
    println!("  Manifest: {}", outcome.manifest_path);
    println!("Enabled {}", outcome.image_id);

    if let Some(warning) = &outcome.cleanup_warning {
        eprintln!("Warning: {warning}");
    }
}

pub fn print_inventory(inventory: &Inventory) {
    if inventory.versions.is_empty() {
        println!("No load balancer images are installed.");
    } else {
        let enabled = inventory.enabled.as_deref();
        let rows: Vec<ImageRow> = inventory
            .versions
            .iter()
            .flat_map(|group| group.images.iter())
            .map(|image| ImageRow {
                version: image.version.to_string(),
                image_id: image.id.clone(),
                location: image.location.clone(),
                description: image.description.clone().unwrap_or_default(),
                enabled: if Some(image.id.as_str()) == enabled {
                    "*".to_string()
                } else {
                    String::new()
                },
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();

        println!("{table}");
    }

    match inventory.enabled.as_deref() {
        None => println!("\nNo load balancer image is enabled."),
        Some(id) if inventory.enabled_is_dangling() => {
            println!("\nEnabled image {id} is not among the installed images.")
        }
        Some(id) => println!("\nEnabled image: {id}"),
    }
}

pub fn print_removal(report: &RemovalReport, dry_run: bool) {
    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }

    if dry_run {
        if report.planned.is_empty() {
            println!("Nothing would be removed.");
        } else {
            println!("Would remove:");
            for id in &report.planned {
                println!("  {id}");
            }
        }
        return;
    }

    if report.removed.is_empty() {
        println!("No images removed.");
    } else {
        println!("Removed:");
        for id in &report.removed {
            println!("  {id}");
        }
    }

    if !report.failures.is_empty() {
        eprintln!("Failed:");
        for failure in &report.failures {
            eprintln!("  {failure}");
        }
    }
}
