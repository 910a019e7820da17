//! Redirect resolution.
//!
//! Redirects are followed manually inside one logical attempt. Targets with
//! a recognized custom scheme are handed back to the caller unfollowed, and
//! targets with any other non-HTTP scheme fall through the same way after a
//! warning; both outcomes are observable behavior callers depend on.

use reqwest::{Method, StatusCode};
use tracing::{debug, error, warn};
use url::Url;

/// Outcome of resolving one redirect response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RedirectStep {
    /// Follow to the target, keeping the request method and body.
    Follow(Url),
    /// Follow to the target, downgrading the method to GET and dropping the
    /// body.
    FollowAsGet(Url),
    /// Hand the redirect response itself back to the caller.
    ReturnResponse,
    /// The redirect cannot be followed; the request yields no result.
    Abort,
}

/// Resolves a redirect response into the next step.
///
/// Applies relative-reference resolution against the current URL, fragment
/// inheritance from the current URL when the target carries none, and the
/// method-downgrade rules for 301/302/303 (HEAD is preserved as HEAD).
pub(crate) fn resolve_redirect(
    current: &Url,
    status: StatusCode,
    method: &Method,
    location: Option<&str>,
    custom_schemes: &[String],
) -> RedirectStep {
    let Some(location) = location else {
        error!(url = %current, status = %status, "Redirect response without a Location header");
        return RedirectStep::Abort;
    };

    let target = match Url::parse(location) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => match current.join(location) {
            Ok(joined) => joined,
            Err(e) => {
                error!(url = %current, location, error = %e, "Failed to resolve relative redirect");
                return RedirectStep::Abort;
            }
        },
        Err(e) => {
            error!(url = %current, location, error = %e, "Failed to parse redirect target");
            return RedirectStep::Abort;
        }
    };

    match target.scheme() {
        "http" | "https" => {}
        scheme if custom_schemes.iter().any(|s| s == scheme) => {
            debug!(scheme, url = %target, "Redirect to recognized custom scheme, returning response");
            return RedirectStep::ReturnResponse;
        }
        scheme => {
            warn!(scheme, url = %target, "Redirect to unsupported scheme, returning response as-is");
            return RedirectStep::ReturnResponse;
        }
    }

    let mut target = target;
    if target.fragment().is_none() {
        if let Some(fragment) = current.fragment() {
            target.set_fragment(Some(fragment));
        }
    }

    match status {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
            if *method == Method::HEAD {
                RedirectStep::Follow(target)
            } else {
                RedirectStep::FollowAsGet(target)
            }
        }
        _ => RedirectStep::Follow(target),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schemes() -> Vec<String> {
        vec!["steammobile".to_string()]
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_relative_target_resolves_against_current() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::FOUND,
            &Method::GET,
            Some("/y"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::FollowAsGet(url("http://a/y")));
    }

    #[test]
    fn test_fragment_inherited_from_current() {
        let step = resolve_redirect(
            &url("http://a/x#frag"),
            StatusCode::FOUND,
            &Method::GET,
            Some("/y"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::FollowAsGet(url("http://a/y#frag")));
    }

    #[test]
    fn test_target_fragment_wins() {
        let step = resolve_redirect(
            &url("http://a/x#frag"),
            StatusCode::FOUND,
            &Method::GET,
            Some("/y#other"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::FollowAsGet(url("http://a/y#other")));
    }

    #[test]
    fn test_custom_scheme_returns_response() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::FOUND,
            &Method::GET,
            Some("steammobile://foo"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::ReturnResponse);
    }

    #[test]
    fn test_unknown_scheme_returns_response() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::FOUND,
            &Method::GET,
            Some("gopher://hole"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::ReturnResponse);
    }

    #[test]
    fn test_missing_location_aborts() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::FOUND,
            &Method::GET,
            None,
            &schemes(),
        );
        assert_eq!(step, RedirectStep::Abort);
    }

    #[test]
    fn test_head_is_preserved() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::MOVED_PERMANENTLY,
            &Method::HEAD,
            Some("http://a/y"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::Follow(url("http://a/y")));
    }

    #[test]
    fn test_post_downgrades_on_303() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::SEE_OTHER,
            &Method::POST,
            Some("http://a/y"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::FollowAsGet(url("http://a/y")));
    }

    #[test]
    fn test_post_preserved_on_307() {
        let step = resolve_redirect(
            &url("http://a/x"),
            StatusCode::TEMPORARY_REDIRECT,
            &Method::POST,
            Some("http://a/y"),
            &schemes(),
        );
        assert_eq!(step, RedirectStep::Follow(url("http://a/y")));
    }
}
