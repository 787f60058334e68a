use super::*;
use crate::generation::mock::MockGenerationClient;

// Helper to build a pool over plain string keys
fn pool_with(keys: &[&str], max_usage: u32, client: MockGenerationClient) -> CredentialPool {
    CredentialPool::new(
        keys.iter().map(|k| k.to_string()).collect(),
        max_usage,
        Arc::new(client),
    )
    .expect("Failed to create pool")
}

async fn usage_of(pool: &CredentialPool) -> Vec<u32> {
    pool.stats().await.iter().map(|s| s.usage_count).collect()
}

async fn mark_unhealthy(pool: &CredentialPool, credential: &Credential) {
    let error = GenerationError::Request("boom".to_string());
    for _ in 0..UNHEALTHY_ERROR_THRESHOLD {
        pool.report_error(credential, &error).await;
    }
}

#[cfg(test)]
mod construction_tests {
    use super::*;

    #[test]
    fn test_rejects_empty_key_list() {
        let result = CredentialPool::new(vec![], 5, Arc::new(MockGenerationClient::success("x")));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_cap() {
        let result = CredentialPool::new(
            vec!["key".to_string()],
            0,
            Arc::new(MockGenerationClient::success("x")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("AIzaSyExample1234"), "...1234");
        assert_eq!(mask_key("ab"), "...ab");
    }

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = Credential {
            index: 0,
            secret: Arc::new(SecretString::from("super-secret-key".to_string())),
            masked: mask_key("super-secret-key"),
        };
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("...-key"));
    }
}

#[cfg(test)]
mod acquire_tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_prefers_lowest_usage() {
        let pool = pool_with(&["a", "b", "c"], 10, MockGenerationClient::success("x"));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        let third = pool.acquire().await.unwrap();
        let fourth = pool.acquire().await.unwrap();

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(third.index(), 2);
        assert_eq!(fourth.index(), 0);
        assert_eq!(usage_of(&pool).await, vec![2, 1, 1]);
    }

    #[tokio::test]
    async fn test_reset_after_every_key_hits_cap() {
        // K = 3 keys, C = 2 uses each
        let pool = pool_with(&["a", "b", "c"], 2, MockGenerationClient::success("x"));

        for _ in 0..6 {
            pool.acquire().await.unwrap();
        }
        assert_eq!(usage_of(&pool).await, vec![2, 2, 2]);

        // The (K*C + 1)-th call resets every counter, then succeeds
        let credential = pool.acquire().await.unwrap();
        assert_eq!(credential.index(), 0);
        assert_eq!(usage_of(&pool).await, vec![1, 0, 0]);
    }

    #[tokio::test]
    async fn test_two_keys_cap_one_cycle() {
        let pool = pool_with(&["key-a", "key-b"], 1, MockGenerationClient::success("x"));

        assert_eq!(pool.acquire().await.unwrap().index(), 0);
        assert_eq!(usage_of(&pool).await, vec![1, 0]);

        assert_eq!(pool.acquire().await.unwrap().index(), 1);
        assert_eq!(usage_of(&pool).await, vec![1, 1]);

        assert_eq!(pool.acquire().await.unwrap().index(), 0);
        assert_eq!(usage_of(&pool).await, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_unhealthy_keys_are_skipped() {
        let pool = pool_with(&["a", "b"], 10, MockGenerationClient::success("x"));
        let a = pool.acquire().await.unwrap();
        mark_unhealthy(&pool, &a).await;

        for _ in 0..3 {
            assert_eq!(pool.acquire().await.unwrap().index(), 1);
        }
    }

    #[tokio::test]
    async fn test_no_healthy_credential() {
        let pool = pool_with(&["only"], 10, MockGenerationClient::success("x"));
        let only = pool.acquire().await.unwrap();
        mark_unhealthy(&pool, &only).await;

        let result = pool.acquire().await;
        assert!(matches!(result, Err(GenerationError::NoHealthyCredential)));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_cap() {
        let pool = Arc::new(pool_with(&["a", "b", "c", "d"], 5, MockGenerationClient::success("x")));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move { pool.acquire().await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let usage = usage_of(&pool).await;
        assert_eq!(usage, vec![5, 5, 5, 5]);
    }
}

#[cfg(test)]
mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_three_errors_mark_unhealthy() {
        let pool = pool_with(&["a", "b"], 10, MockGenerationClient::success("x"));
        let a = pool.acquire().await.unwrap();
        let error = GenerationError::RateLimited("429".to_string());

        pool.report_error(&a, &error).await;
        pool.report_error(&a, &error).await;
        assert_eq!(pool.available_count().await, 2);

        pool.report_error(&a, &error).await;
        assert_eq!(pool.available_count().await, 1);

        let stats = pool.stats().await;
        assert!(!stats[0].is_healthy);
        assert_eq!(stats[0].error_count, 3);
        assert!(stats[0].last_error.as_deref().unwrap().contains("429"));
    }

    #[tokio::test]
    async fn test_successful_health_check_restores_key() {
        let pool = pool_with(&["a", "b"], 10, MockGenerationClient::success("x"));
        let a = pool.acquire().await.unwrap();
        mark_unhealthy(&pool, &a).await;

        assert!(pool.health_check(&a).await);

        let stats = pool.stats().await;
        assert!(stats[0].is_healthy);
        assert_eq!(stats[0].error_count, 0);
        assert!(stats[0].last_health_check.is_some());
        assert_eq!(pool.available_count().await, 2);
    }

    #[tokio::test]
    async fn test_failed_health_check_records_error() {
        let pool = pool_with(&["bad", "good"], 10, MockGenerationClient::failing_keys(&["bad"]));
        let bad = pool.acquire().await.unwrap();

        assert!(!pool.health_check(&bad).await);

        let stats = pool.stats().await;
        assert!(!stats[0].is_healthy);
        assert_eq!(stats[0].error_count, 1);
        assert!(stats[0].last_error.is_some());
        assert!(stats[0].last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_recently_checked_unhealthy_key_is_not_reprobed() {
        let client = MockGenerationClient::success("x");
        client.set_probe_succeeds(false);
        let pool = pool_with(&["a"], 10, client.clone());
        let a = pool.acquire().await.unwrap();

        assert!(!pool.health_check(&a).await);
        assert_eq!(client.probe_calls().len(), 1);

        // Within the interval: no second probe even though probes would now pass
        client.set_probe_succeeds(true);
        assert!(!pool.health_check(&a).await);
        assert_eq!(client.probe_calls().len(), 1);

        // Explicit refresh always probes
        assert_eq!(pool.refresh_unhealthy().await, 1);
        assert_eq!(client.probe_calls().len(), 2);
        assert_eq!(pool.available_count().await, 1);
    }

    #[tokio::test]
    async fn test_stale_unhealthy_key_is_reprobed() {
        let client = MockGenerationClient::success("x");
        client.set_probe_succeeds(false);
        let pool = pool_with(&["a"], 10, client.clone())
            .with_health_check_interval(Duration::from_millis(20));
        let a = pool.acquire().await.unwrap();

        assert!(!pool.health_check(&a).await);
        client.set_probe_succeeds(true);
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(pool.health_check(&a).await);
        assert_eq!(client.probe_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_is_healthy_probes_when_never_checked() {
        let client = MockGenerationClient::success("x");
        let pool = pool_with(&["a"], 10, client.clone());
        let a = pool.acquire().await.unwrap();

        assert!(pool.is_healthy(&a).await);
        assert_eq!(client.probe_calls().len(), 1);

        // Fresh check: answered from the record
        assert!(pool.is_healthy(&a).await);
        assert_eq!(client.probe_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_unhealthy_tolerates_failures() {
        let pool = pool_with(&["bad", "good-1", "good-2"], 10, MockGenerationClient::failing_keys(&["bad"]));
        let keys = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        for key in &keys {
            mark_unhealthy(&pool, key).await;
        }
        assert_eq!(pool.available_count().await, 0);

        let recovered = pool.refresh_unhealthy().await;
        assert_eq!(recovered, 2);
        assert_eq!(pool.available_count().await, 2);

        let stats = pool.stats().await;
        assert!(!stats[0].is_healthy);
        assert!(stats[1].is_healthy);
        assert!(stats[2].is_healthy);
    }

    #[tokio::test]
    async fn test_recover_stale_skips_recently_checked_keys() {
        let client = MockGenerationClient::success("x");
        let pool = pool_with(&["a", "b"], 10, client.clone());
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        // a fails a probe, b only collects errors and was never checked
        client.set_probe_succeeds(false);
        assert!(!pool.health_check(&a).await);
        mark_unhealthy(&pool, &a).await;
        mark_unhealthy(&pool, &b).await;
        assert_eq!(client.probe_calls(), vec!["a".to_string()]);

        client.set_probe_succeeds(true);
        assert_eq!(pool.recover_stale().await, 1);
        assert_eq!(client.probe_calls(), vec!["a".to_string(), "b".to_string()]);

        let stats = pool.stats().await;
        assert!(!stats[0].is_healthy);
        assert!(stats[1].is_healthy);
        assert_eq!(stats[1].error_count, 0);
    }

    #[tokio::test]
    async fn test_refresh_with_nothing_unhealthy() {
        let client = MockGenerationClient::success("x");
        let pool = pool_with(&["a", "b"], 10, client.clone());
        assert_eq!(pool.refresh_unhealthy().await, 0);
        assert!(client.probe_calls().is_empty());
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        struct SlowProbe;

        #[async_trait::async_trait]
        impl GenerationClient for SlowProbe {
            async fn generate(
                &self,
                _api_key: &SecretString,
                _messages: &[crate::types::PromptMessage],
            ) -> crate::generation::GenerationResult<String> {
                Ok(String::new())
            }

            async fn generate_structured(
                &self,
                _api_key: &SecretString,
                _messages: &[crate::types::PromptMessage],
                _schema: &serde_json::Value,
            ) -> crate::generation::GenerationResult<serde_json::Value> {
                Ok(serde_json::Value::Null)
            }

            async fn probe(&self, _api_key: &SecretString) -> crate::generation::GenerationResult<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let pool = CredentialPool::new(vec!["a".to_string()], 10, Arc::new(SlowProbe))
            .unwrap()
            .with_probe_timeout(Duration::from_millis(20));
        let a = pool.acquire().await.unwrap();

        assert!(!pool.health_check(&a).await);
        let stats = pool.stats().await;
        assert!(!stats[0].is_healthy);
        assert!(stats[0].last_error.as_deref().unwrap().contains("timed out"));
    }
}
