use super::{json_pretty, maybe_spinner, open_workspace, settle, Context, EXIT_SUCCESS};
use lamina_core::LayerMount;

pub fn run(ctx: &Context, part: &str, packages: &[String], pkg_cache: bool) -> Result<u8, String> {
    let mut ws = open_workspace(ctx)?;

    let pb = maybe_spinner(ctx, &format!("installing into part '{part}'..."));
    let result = LayerMount::scope(&mut ws.manager, part, pkg_cache, |mount| {
        mount.install_packages(packages)
    });
    settle(pb, result, "packages installed", "install failed").map_err(|e| e.to_string())?;

    if ctx.json {
        let payload = serde_json::json!({
            "part": part,
            "installed": packages,
            "package_cache": pkg_cache,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("installed into '{part}': {}", packages.join(" "));
    }
    Ok(EXIT_SUCCESS)
}
