//! Include/exclude filter rules.
//!
//! Read as a `(u32 rule_len, rule_len bytes)` record stream terminated by
//! `rule_len == 0`, immediately after muxing turns on. Each rule is
//! expanded into up to three patterns so a bare `foo` also matches the
//! directory form and its contents.

use crate::error::Result;
use crate::protocol::mux::{self, MuxReader};
use crate::protocol::transport::Transport;
use globset::{Glob, GlobMatcher};

/// One compiled, expanded filter pattern.
pub struct FilterRule {
    pub include: bool,
    matcher: GlobMatcher,
}

impl FilterRule {
    pub(crate) fn new(include: bool, pattern: &str) -> Option<Self> {
        Glob::new(pattern).ok().map(|g| Self {
            include,
            matcher: g.compile_matcher(),
        })
    }
}

/// Read the filter block from an already-muxed reader.
///
/// A rule that doesn't start with `"+ "` or `"- "` is reported to the
/// client as a multiplexed error but does not end the connection; reading
/// continues with the next rule.
pub async fn read_filter_block<T: Transport>(
    reader: &mut MuxReader<T>,
) -> Result<Vec<FilterRule>> {
    let mut rules = Vec::new();
    loop {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 {
            break;
        }

        let mut raw = vec![0u8; len];
        reader.read_exact(&mut raw).await?;
        let rule = String::from_utf8_lossy(&raw).into_owned();

        match expand_rule(&rule) {
            Some(expanded) => rules.extend(expanded),
            None => {
                mux::send_error(
                    reader.transport_mut(),
                    &format!("unsupported filter rule {rule:?}"),
                )
                .await?;
            }
        }
    }
    Ok(rules)
}

/// Parse rsync's own argv-level filter syntax (`--exclude`/`--include`),
/// so a rule that doesn't start with `"+ "`/`"- "` but is one of the raw
/// command-line forms can also expand.
fn expand_rule(rule: &str) -> Option<Vec<FilterRule>> {
    let (include, pattern) = if let Some(p) = rule.strip_prefix("+ ") {
        (true, p)
    } else if let Some(p) = rule.strip_prefix("- ") {
        (false, p)
    } else {
        return None;
    };

    let mut patterns = Vec::with_capacity(3);
    if let Some(base) = pattern.strip_suffix("/*") {
        patterns.push(format!("{base}/*"));
    } else if let Some(base) = pattern.strip_suffix('/') {
        patterns.push(format!("{base}/"));
        patterns.push(format!("{base}/*"));
    } else {
        patterns.push(pattern.to_owned());
        patterns.push(format!("{pattern}/"));
        patterns.push(format!("{pattern}/*"));
    }

    Some(
        patterns
            .into_iter()
            .filter_map(|p| FilterRule::new(include, &p))
            .collect(),
    )
}

/// Apply the expanded rule list to a candidate path. Directories must
/// carry a trailing `/`. The first matching rule decides; with no match,
/// the default is include.
#[must_use]
pub fn is_excluded(rules: &[FilterRule], candidate: &str) -> bool {
    for rule in rules {
        if rule.matcher.is_match(candidate) {
            return !rule.include;
        }
    }
    false
}
