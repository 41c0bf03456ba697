use super::{json_pretty, maybe_spinner, open_workspace, settle, Context, EXIT_SUCCESS};
use lamina_core::PackageCacheMount;

pub fn run(ctx: &Context, packages: &[String]) -> Result<u8, String> {
    let mut ws = open_workspace(ctx)?;
    let packages = if packages.is_empty() {
        ws.project.all_overlay_packages()
    } else {
        packages.to_vec()
    };

    if packages.is_empty() {
        if ctx.json {
            println!("{}", json_pretty(&serde_json::json!({ "downloaded": [] }))?);
        } else {
            println!("no overlay packages to fetch");
        }
        return Ok(EXIT_SUCCESS);
    }

    let pb = maybe_spinner(ctx, "fetching overlay packages...");
    let result = PackageCacheMount::scope(&mut ws.manager, |cache| {
        cache.refresh_package_index()?;
        cache.download_packages(&packages)
    });
    settle(pb, result, "package cache populated", "fetch failed").map_err(|e| e.to_string())?;

    if ctx.json {
        println!(
            "{}",
            json_pretty(&serde_json::json!({ "downloaded": packages }))?
        );
    } else {
        println!("downloaded: {}", packages.join(" "));
    }
    Ok(EXIT_SUCCESS)
}
