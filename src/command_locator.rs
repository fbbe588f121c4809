use anyhow::{anyhow, bail, Context, Result};
use std::process::Command;

use crate::action::{LocateParams, Point, TargetRef};
use crate::adapter::Locator;

/// Delegates template matching to an external program.
///
/// The program is called as `argv... <target> <confidence> <grayscale>` and
/// answers on stdout with `x y` when the target is on screen. Empty output or
/// exit status 1 means "not visible"; anything else is an error.
#[derive(Debug, Clone)]
pub struct CommandLocator {
    program: String,
    args: Vec<String>,
}

impl CommandLocator {
    pub fn new(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("locator.command is empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Locator for CommandLocator {
    fn locate(&mut self, target: &TargetRef, params: &LocateParams) -> Result<Option<Point>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(target.as_str())
            .arg(params.confidence.to_string())
            .arg(params.grayscale.to_string())
            .output()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if output.status.code() == Some(1) {
            return Ok(None);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} failed ({}): {}", self.program, output.status, stderr.trim());
        }
        parse_point(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_point(stdout: &str) -> Result<Option<Point>> {
    let line = stdout.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let mut it = line.split_whitespace();
    match (it.next(), it.next(), it.next()) {
        (Some(x), Some(y), None) => {
            let x = x.parse().with_context(|| format!("bad x in `{line}`"))?;
            let y = y.parse().with_context(|| format!("bad y in `{line}`"))?;
            Ok(Some(Point::new(x, y)))
        }
        _ => bail!("expected `x y`, got `{line}`"),
    }
}
