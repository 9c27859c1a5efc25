// src/review.rs

//! Human security review of community recipes
//!
//! Before the recipe runs outside the evaluation sandbox, the reviewer is
//! shown who maintains the package and how trusted it looks, along with
//! everything the scanner flagged, and decides whether the build goes ahead. This is the only point where the
//! pipeline waits for a person.

use crate::error::Result;
use crate::recipe::BuildRecipe;
use crate::repository::PackageInfo;
use chrono::{DateTime, Utc};
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};
use std::sync::Mutex;
use tracing::{info, warn};

/// Outcome of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Decides whether a recipe may be built
pub trait ReviewGate: Send + Sync {
    fn review(&self, recipe: &BuildRecipe, info: &PackageInfo) -> Result<Verdict>;
}

/// Gate that accepts everything without prompting
///
/// Used when review is disabled and by non-interactive callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAccept;

impl ReviewGate for AutoAccept {
    fn review(&self, recipe: &BuildRecipe, _info: &PackageInfo) -> Result<Verdict> {
        if recipe.has_dangerous_commands() {
            warn!(
                "Accepting {} without review despite {} flagged line(s)",
                recipe.name(),
                recipe.dangerous.len()
            );
        }
        Ok(Verdict::Accept)
    }
}

struct Streams<R, W> {
    input: R,
    output: W,
}

/// Gate that shows a summary and asks the user
pub struct InteractiveReview<R, W> {
    streams: Mutex<Streams<R, W>>,
}

impl InteractiveReview<BufReader<Stdin>, Stdout> {
    /// Prompt on the process's standard streams
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> InteractiveReview<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            streams: Mutex::new(Streams { input, output }),
        }
    }

    /// Give back the streams, e.g. to inspect captured output
    pub fn into_inner(self) -> (R, W) {
        let streams = self
            .streams
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (streams.input, streams.output)
    }

    fn prompt(streams: &mut Streams<R, W>, recipe: &BuildRecipe) -> Result<Verdict> {
        let Streams { input, output } = streams;

        loop {
            write!(output, "Proceed with build? [Y]es / [v]iew PKGBUILD / [n]o: ")?;
            output.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(output)?;
                info!("No answer for {}, treating as rejection", recipe.name());
                return Ok(Verdict::Reject);
            }

            match line.trim().to_lowercase().as_str() {
                "" | "y" | "yes" => return Ok(Verdict::Accept),
                "n" | "no" => return Ok(Verdict::Reject),
                "v" | "view" => write_numbered(output, &recipe.raw)?,
                other => writeln!(output, "Unknown option '{other}'. Please answer y, v or n.")?,
            }
        }
    }
}

impl<R, W> ReviewGate for InteractiveReview<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn review(&self, recipe: &BuildRecipe, info: &PackageInfo) -> Result<Verdict> {
        let mut streams = self
            .streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        render(&mut streams.output, recipe, info)?;
        let verdict = Self::prompt(&mut streams, recipe)?;
        info!("Review of {}: {:?}", recipe.name(), verdict);
        Ok(verdict)
    }
}

fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn list(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join("  ")
    }
}

/// Write the review summary for `recipe`
pub fn render(out: &mut impl Write, recipe: &BuildRecipe, info: &PackageInfo) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "=== Security review: {} ===", recipe.name())?;
    writeln!(out)?;

    match &info.maintainer {
        Some(maintainer) => writeln!(out, "  Maintainer    : {maintainer}")?,
        None => writeln!(out, "  Maintainer    : ORPHANED (no maintainer)")?,
    }
    writeln!(out, "  Votes         : {}", info.votes)?;
    writeln!(out, "  Popularity    : {:.2}", info.popularity)?;
    writeln!(out, "  Last updated  : {}", timestamp(info.last_modified_at()))?;
    if info.is_out_of_date() {
        writeln!(
            out,
            "  Out of date   : flagged {}",
            timestamp(info.out_of_date_at())
        )?;
    }
    writeln!(out)?;

    writeln!(out, "  Package       : {}", recipe.names.join(" "))?;
    if recipe.base != recipe.name() {
        writeln!(out, "  Base          : {}", recipe.base)?;
    }
    writeln!(out, "  Version       : {}", recipe.full_version())?;
    if !recipe.description.is_empty() {
        writeln!(out, "  Description   : {}", recipe.description)?;
    }
    if !recipe.url.is_empty() {
        writeln!(out, "  URL           : {}", recipe.url)?;
    }
    writeln!(out)?;

    writeln!(out, "  Depends       : {}", list(&recipe.depends))?;
    writeln!(out, "  Make depends  : {}", list(&recipe.makedepends))?;
    if !recipe.checkdepends.is_empty() {
        writeln!(out, "  Check depends : {}", list(&recipe.checkdepends))?;
    }
    if !recipe.optdepends.is_empty() {
        writeln!(out, "  Optional      : {}", list(&recipe.optdepends_names()))?;
    }
    writeln!(out)?;

    let sources = recipe.source_urls();
    if sources.is_empty() {
        writeln!(out, "  Sources       : no remote sources")?;
    } else {
        writeln!(out, "  Sources:")?;
        for url in &sources {
            writeln!(out, "    {url}")?;
        }
    }

    let hooks = recipe.hooks();
    if hooks.is_empty() {
        writeln!(out, "  Functions     : None")?;
    } else {
        writeln!(out, "  Functions     : {}", hooks.join(" "))?;
    }
    if !recipe.install.is_empty() {
        writeln!(out, "  Install script: {}", recipe.install)?;
    }
    writeln!(out)?;

    if recipe.dangerous.is_empty() {
        writeln!(out, "  No suspicious commands detected.")?;
    } else {
        writeln!(
            out,
            "  [WARNING] {} suspicious command(s) detected:",
            recipe.dangerous.len()
        )?;
        for found in &recipe.dangerous {
            writeln!(out, "    line {:>4}: {}", found.line, found.text)?;
            writeln!(out, "               {}", found.reason)?;
        }
    }
    writeln!(out)
}

fn write_numbered(out: &mut impl Write, raw: &str) -> io::Result<()> {
    writeln!(out)?;
    for (idx, line) in raw.lines().enumerate() {
        writeln!(out, "{:>4} | {}", idx + 1, line)?;
    }
    writeln!(out)
}
