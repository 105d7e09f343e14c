//! Resource locator parsing: `host[:port]/project/.../app[:tag][@digest]`.

/// The pieces of a locator the ingress cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator<'a> {
  pub app: &'a str,
  pub tag: Option<&'a str>,
}

/// Parse a locator into app name and optional tag.
///
/// The app is the last path segment with any `:tag` / `@digest` suffix
/// stripped. Returns `None` when the locator has fewer than three segments
/// (registry host, project, repository) or the app name is empty.
pub fn parse(locator: &str) -> Option<Locator<'_>> {
  let segments: Vec<&str> = locator.split('/').collect();
  if segments.len() < 3 {
    return None;
  }
  let last = segments[segments.len() - 1];
  let last = last.split_once('@').map_or(last, |(name, _)| name);
  let (app, tag) = match last.split_once(':') {
    Some((app, tag)) => (app, Some(tag).filter(|t| !t.is_empty())),
    None => (last, None),
  };
  if app.is_empty() {
    return None;
  }
  Some(Locator { app, tag })
}

/// A locator counts as a build-hook delivery when it contains the marker.
pub fn is_build_hook(locator: &str, marker: &str) -> bool {
  !marker.is_empty() && locator.contains(marker)
}
