//! Host addressing
//!
//! Every input line is either a selection directive or a command:
//!
//! | line              | effect                                             |
//! |-------------------|----------------------------------------------------|
//! | blank             | nothing                                            |
//! | `@` or `@*`       | clear the selection, show every host               |
//! | `@1,3`            | select hosts 1 and 3, hide the rest                |
//! | `@1,3 uptime`     | run `uptime` on hosts 1 and 3 only                 |
//! | `uptime`          | run on the selection, or on every host if empty    |
//!
//! Indices that match no host are dropped without error. A piece of the
//! index list that is not an integer rejects the whole line.

use std::sync::Arc;

use super::host::Host;
use super::selection::Selection;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid host index {token:?} in address {address:?}")]
    InvalidIndex { address: String, token: String },
}

/// What the engine should do with one input line
#[derive(Debug)]
pub enum Directive {
    /// Blank line
    Noop,
    /// `@` / `@*`
    ClearSelection,
    /// `@<list>` with nothing after it; hosts in master-list order
    Select(Vec<Arc<Host>>),
    /// Send `command` to `targets`
    Dispatch {
        targets: Vec<Arc<Host>>,
        command: String,
    },
}

/// Classify `line` against the host list and the current selection
///
/// Pure: the caller applies the returned directive.
pub fn resolve(
    line: &str,
    hosts: &[Arc<Host>],
    selection: &Selection,
) -> Result<Directive, AddressError> {
    if line.trim().is_empty() {
        return Ok(Directive::Noop);
    }

    if line == "@" || line == "@*" {
        return Ok(Directive::ClearSelection);
    }

    if let Some(addressed) = line.strip_prefix('@') {
        let (list, command) = split_address(addressed);
        let indices = parse_indices(list, line)?;

        // master-list order, not address order
        let targets: Vec<Arc<Host>> = hosts
            .iter()
            .filter(|host| indices.iter().any(|&i| i == host.index() as i64))
            .cloned()
            .collect();

        if command.trim().is_empty() {
            return Ok(Directive::Select(targets));
        }
        return Ok(Directive::Dispatch {
            targets,
            command: command.to_string(),
        });
    }

    Ok(Directive::Dispatch {
        targets: selection.targets(hosts),
        command: line.to_string(),
    })
}

/// Split `"1,3  uptime -p"` into `("1,3", "uptime -p")` at the first
/// whitespace run
fn split_address(addressed: &str) -> (&str, &str) {
    match addressed.find(char::is_whitespace) {
        Some(end) => (&addressed[..end], addressed[end..].trim_start()),
        None => (addressed, ""),
    }
}

fn parse_indices(list: &str, line: &str) -> Result<Vec<i64>, AddressError> {
    list.split(',')
        .map(|piece| {
            piece
                .trim()
                .parse::<i64>()
                .map_err(|_| AddressError::InvalidIndex {
                    address: line
                        .split(char::is_whitespace)
                        .next()
                        .unwrap_or(line)
                        .to_string(),
                    token: piece.trim().to_string(),
                })
        })
        .collect()
}
