use reqwest::Url;

use crate::error::ClientError;

const SLOT: &str = "{}";

/// A request path built from a template whose `{}` slots are the only place
/// caller data may appear. Every slot becomes exactly one percent-encoded
/// path segment, so a value like `a/b` can never address another resource.
/// The dot segments `.` and `..` are refused outright since URL joining would
/// collapse them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// Expand `template` (e.g. `/wallet/{}/tx/{}`) with `args`, one per slot.
    pub fn new(template: &str, args: &[&str]) -> Result<Self, ClientError> {
        let slots = template.split('/').filter(|s| *s == SLOT).count();
        if slots != args.len() {
            return Err(ClientError::InvalidRequest(format!(
                "path template `{template}` has {slots} slot(s) but {} argument(s) were given",
                args.len()
            )));
        }

        let mut args = args.iter();
        let mut segments = Vec::new();
        for part in template.split('/').filter(|s| !s.is_empty()) {
            if part == SLOT {
                // Counted above, so there is always an argument left here.
                let Some(arg) = args.next() else { break };
                if arg.is_empty() {
                    return Err(ClientError::InvalidRequest(format!(
                        "empty argument for path template `{template}`"
                    )));
                }
                if matches!(*arg, "." | "..") {
                    return Err(ClientError::InvalidRequest(format!(
                        "dot segment `{arg}` is not allowed in path template `{template}`"
                    )));
                }
                segments.push((*arg).to_owned());
            } else if part.contains(&['?', '#', '{', '}'][..]) {
                return Err(ClientError::InvalidRequest(format!(
                    "path template `{template}` contains a reserved character"
                )));
            } else {
                segments.push(part.to_owned());
            }
        }

        Ok(Self { segments })
    }

    /// The root resource of the service (`/`).
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Join onto `base`, keeping whatever prefix `base` already carries.
    pub fn join_to(&self, base: &Url) -> Result<Url, ClientError> {
        let mut url = base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|()| {
                ClientError::InvalidRequest(format!("base url `{base}` cannot carry a path"))
            })?;
            path.pop_if_empty();
            path.extend(&self.segments);
        }
        Ok(url)
    }
}
