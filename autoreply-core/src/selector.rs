use crate::error::ConfigError;

/// Decide whether an eligible item gets a reply.
///
/// Replies addressed to the account bypass sampling. Otherwise one uniform
/// draw in `[0, 1)` is compared against the rate, so a rate of `0.0` never
/// replies and `1.0` always does.
pub fn should_reply(response_rate: f64, bypass_sampling: bool) -> bool {
    should_reply_with(&mut fastrand::Rng::new(), response_rate, bypass_sampling)
}

pub fn should_reply_with(rng: &mut fastrand::Rng, response_rate: f64, bypass_sampling: bool) -> bool {
    if bypass_sampling {
        return true;
    }
    rng.f64() < response_rate
}

/// Pick a response template uniformly at random.
pub fn select_response(templates: &[String]) -> Result<&str, ConfigError> {
    select_response_with(&mut fastrand::Rng::new(), templates)
}

pub fn select_response_with<'a>(
    rng: &mut fastrand::Rng,
    templates: &'a [String],
) -> Result<&'a str, ConfigError> {
    if templates.is_empty() {
        return Err(ConfigError::ValidationFailed {
            reason: "no response templates to choose from".to_string(),
        });
    }
    Ok(&templates[rng.usize(..templates.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_bounds() {
        for _ in 0..1000 {
            assert!(should_reply(1.0, false));
            assert!(!should_reply(0.0, false));
            assert!(should_reply(0.0, true));
            assert!(should_reply(0.5, true));
        }
    }

    #[test]
    fn test_rate_is_roughly_respected() {
        let mut rng = fastrand::Rng::with_seed(7);
        let hits = (0..10_000)
            .filter(|_| should_reply_with(&mut rng, 0.3, false))
            .count();
        assert!((2_500..3_500).contains(&hits), "hits = {hits}");
    }

    #[test]
    fn test_select_response_from_list() {
        let templates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..100 {
            let picked = select_response_with(&mut rng, &templates).unwrap();
            assert!(templates.iter().any(|t| t == picked));
        }
    }

    #[test]
    fn test_select_response_empty_is_config_error() {
        let err = select_response(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationFailed { .. }));
    }
}
