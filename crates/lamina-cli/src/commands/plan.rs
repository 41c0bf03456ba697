use super::{backend_for, json_pretty, load, Context, EXIT_SUCCESS};
use lamina_core::LayerManager;
use lamina_runtime::OverlayStack;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct PartPlan<'a> {
    part: &'a str,
    #[serde(flatten)]
    stack: OverlayStack,
    packages: &'a [String],
}

#[derive(Serialize)]
struct Plan<'a> {
    overlay_enabled: bool,
    mountpoint: PathBuf,
    package_cache: bool,
    parts: Vec<PartPlan<'a>>,
}

pub fn run(ctx: &Context, pkg_cache: bool) -> Result<u8, String> {
    let project = load(ctx)?;
    let manager = LayerManager::from_project(&project, backend_for(ctx, &project)?);

    let mut parts = Vec::new();
    if manager.has_base_layer() {
        for part in &project.parts {
            let stack = manager
                .plan(&part.name, pkg_cache)
                .map_err(|e| e.to_string())?;
            parts.push(PartPlan {
                part: &part.name,
                stack,
                packages: &part.overlay_packages,
            });
        }
    }

    let plan = Plan {
        overlay_enabled: manager.has_base_layer(),
        mountpoint: manager.mount_dir(),
        package_cache: pkg_cache,
        parts,
    };

    if ctx.json {
        println!("{}", json_pretty(&plan)?);
        return Ok(EXIT_SUCCESS);
    }

    if !plan.overlay_enabled {
        println!("no base layer configured; overlays are disabled");
        return Ok(EXIT_SUCCESS);
    }
    println!("mountpoint: {}", plan.mountpoint.display());
    for entry in &plan.parts {
        println!("\npart {}", entry.part);
        println!("  upper: {}", entry.stack.upper_dir.display());
        println!("  lower:");
        for dir in &entry.stack.lower_dirs {
            println!("    {}", dir.display());
        }
        if !entry.packages.is_empty() {
            println!("  packages: {}", entry.packages.join(" "));
        }
    }
    Ok(EXIT_SUCCESS)
}
