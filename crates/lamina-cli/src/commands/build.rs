use super::{
    colorize_state, json_pretty, maybe_spinner, open_workspace, settle, Context, EXIT_SUCCESS,
};
use lamina_core::OverlayStep;

pub fn run(ctx: &Context) -> Result<u8, String> {
    let mut ws = open_workspace(ctx)?;

    let pb = maybe_spinner(ctx, "running overlay step...");
    let result = OverlayStep::new(&mut ws.manager).run();
    let report = settle(pb, result, "overlay step complete", "overlay step failed")
        .map_err(|e| e.to_string())?;

    if ctx.json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    if report.skipped {
        println!(
            "overlay step {}: no base layer configured",
            colorize_state("skipped")
        );
        return Ok(EXIT_SUCCESS);
    }
    if !report.downloaded.is_empty() {
        println!(
            "{} {}",
            colorize_state("downloaded"),
            report.downloaded.join(" ")
        );
    }
    for entry in &report.installed {
        println!(
            "{} {} -> {}",
            colorize_state("installed"),
            entry.packages.join(" "),
            entry.part
        );
    }
    if report.installed.is_empty() {
        println!("no part has overlay packages");
    }
    Ok(EXIT_SUCCESS)
}
