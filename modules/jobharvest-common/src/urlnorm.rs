//! URL normalization — the deduplication key for listings within a run.

use url::Url;

use crate::error::HarvestError;

/// Query parameters that identify the click, not the posting.
const TRACKING_PARAMS: &[&str] = &["gclid", "fbclid", "ref", "source", "mc_cid", "mc_eid"];

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

/// Normalize a possibly-relative URL against an organization's base URL.
///
/// Lowercases scheme and host, resolves relative paths, drops fragments and
/// tracking parameters, and strips the trailing slash on non-root paths.
/// Idempotent: `normalize(normalize(u)) == normalize(u)`.
pub fn normalize(raw: &str, base: Option<&str>) -> Result<String, HarvestError> {
    let raw = raw.trim();
    let mut url = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = base.ok_or_else(|| {
                HarvestError::ContractViolation(format!("relative url '{raw}' with no base"))
            })?;
            let base = Url::parse(base).map_err(|e| {
                HarvestError::ContractViolation(format!("unparseable base url '{base}': {e}"))
            })?;
            base.join(raw).map_err(|e| {
                HarvestError::ContractViolation(format!("cannot resolve '{raw}': {e}"))
            })?
        }
        Err(e) => {
            return Err(HarvestError::ContractViolation(format!(
                "unparseable url '{raw}': {e}"
            )))
        }
    };

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host_keeps_path_case() {
        let n = normalize("HTTPS://Example.ORG/Jobs/AD5", None).unwrap();
        assert_eq!(n, "https://example.org/Jobs/AD5");
    }

    #[test]
    fn resolves_relative_against_base() {
        let n = normalize("/vacancies/12", Some("https://example.org/careers/")).unwrap();
        assert_eq!(n, "https://example.org/vacancies/12");
    }

    #[test]
    fn strips_tracking_params_and_fragment() {
        let n = normalize(
            "https://example.org/jobs?id=7&utm_source=feed&fbclid=xyz#apply",
            None,
        )
        .unwrap();
        assert_eq!(n, "https://example.org/jobs?id=7");
    }

    #[test]
    fn strips_trailing_slash_on_non_root_paths() {
        assert_eq!(
            normalize("https://example.org/jobs/", None).unwrap(),
            "https://example.org/jobs"
        );
        // Root path keeps its slash.
        assert_eq!(
            normalize("https://example.org", None).unwrap(),
            "https://example.org/"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "https://Example.org/jobs/?utm_campaign=x&page=2#top",
            "https://example.org/a%20b?q=c%20d",
            "https://example.org",
        ];
        for raw in inputs {
            let once = normalize(raw, None).unwrap();
            let twice = normalize(&once, None).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn relative_url_without_base_is_a_contract_violation() {
        let err = normalize("jobs/1", None).unwrap_err();
        assert!(matches!(err, HarvestError::ContractViolation(_)));
    }
}
