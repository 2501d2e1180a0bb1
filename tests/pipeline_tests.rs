//! End-to-end tests for the reconciliation pipeline
//!
//! Drives whole passes against an in-memory store: reference extraction,
//! ownership sync, fingerprinting and the pod template annotation write.

mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use config_rollout_controller::config::ControllerConfig;
    use config_rollout_controller::constants::{
        CONFIG_HASH_ANNOTATION, UPDATE_ON_CONFIG_CHANGE_ANNOTATION,
    };
    use config_rollout_controller::controller::events::{reasons, RecordingEventPublisher};
    use config_rollout_controller::controller::reconciler::{
        calculate_config_hash, reconcile, reconcile_workload, release_children, Reconciler,
        ReconcilerError,
    };
    use config_rollout_controller::store::{ChildRef, ConfigSource, MemoryStore};
    use config_rollout_controller::workload::ManagedWorkload;
    use k8s_openapi::api::core::v1::{ConfigMapEnvSource, EnvFromSource};
    use std::sync::Arc;

    const RETRIES: u32 = 3;

    fn stored_children(store: &MemoryStore) -> Vec<ConfigSource> {
        [cm1_ref(), cm2_ref(), s1_ref(), s2_ref()]
            .iter()
            .filter_map(|id| store.child(id))
            .collect()
    }

    fn hash_annotation(store: &MemoryStore, workload: &ManagedWorkload) -> Option<String> {
        refreshed(store, workload)
            .template_annotation(CONFIG_HASH_ANNOTATION)
            .map(str::to_string)
    }

    mod first_pass_tests {
        use super::*;

        #[tokio::test]
        async fn test_takes_ownership_and_stamps_fingerprint() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert_eq!(outcome.children, 4);
            assert_eq!(outcome.ownership.added.len(), 4);
            assert!(outcome.ownership.removed.is_empty());
            assert!(outcome.restarted);
            assert!(outcome.finalizer_changed);
            assert!(refreshed(&store, &workload).has_finalizer());

            for child in stored_children(&store) {
                assert!(child.has_owner(&workload.uid), "{} not owned", child.id);
                assert_eq!(child.owner_references.len(), 1);
            }

            let expected = calculate_config_hash(&stored_children(&store));
            assert_eq!(outcome.hash.as_deref(), Some(expected.as_str()));
            assert_eq!(hash_annotation(&store, &workload), Some(expected));
        }

        #[tokio::test]
        async fn test_owner_reference_shape() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            let owner = store.child(&cm1_ref()).unwrap().owner_references[0].clone();
            assert_eq!(owner.api_version, "apps/v1");
            assert_eq!(owner.kind, "Deployment");
            assert_eq!(owner.name, "example");
            assert_eq!(owner.uid, "uid-example");
            assert_ne!(owner.controller, Some(true));
        }

        #[tokio::test]
        async fn test_missing_child_aborts_before_any_write() {
            let store = MemoryStore::new();
            seed_children(&store);
            store.remove_child(&s2_ref());
            let workload = register(&store, &example_deployment());

            let result = reconcile_workload(&store, &workload, RETRIES).await;
            assert!(matches!(result, Err(ReconcilerError::MissingChild(ref id)) if *id == s2_ref()));
            assert_eq!(store.child_updates(), 0);
            assert_eq!(store.workload_updates(), 0);
            assert_eq!(hash_annotation(&store, &workload), None);
        }

        #[tokio::test]
        async fn test_optional_missing_reference_is_ignored() {
            let store = MemoryStore::new();
            seed_children(&store);
            let mut env_from = vec![config_map_env_from("example2"), secret_env_from("example2")];
            env_from.push(EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: "absent".to_string(),
                    optional: Some(true),
                }),
                ..EnvFromSource::default()
            });
            let workload = register(
                &store,
                &deployment(
                    "example",
                    "uid-example",
                    vec![config_map_volume("example1"), secret_volume("example1")],
                    env_from,
                ),
            );

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert_eq!(outcome.children, 4);
            assert!(outcome.restarted);
        }

        #[tokio::test]
        async fn test_workload_without_references_still_gets_a_fingerprint() {
            let store = MemoryStore::new();
            let workload = register(&store, &deployment("bare", "uid-bare", vec![], vec![]));

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert_eq!(outcome.children, 0);
            assert!(outcome.ownership.is_empty());
            assert_eq!(hash_annotation(&store, &workload), Some(calculate_config_hash(&[])));
        }
    }

    mod steady_state_tests {
        use super::*;

        #[tokio::test]
        async fn test_second_pass_performs_no_writes() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            let first = reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            let child_writes = store.child_updates();
            let workload_writes = store.workload_updates();
            let second = reconcile_workload(&store, &refreshed(&store, &workload), RETRIES)
                .await
                .unwrap();

            assert_eq!(second.mutations(), 0);
            assert_eq!(second.hash, first.hash);
            assert_eq!(store.child_updates(), child_writes);
            assert_eq!(store.workload_updates(), workload_writes);
        }

        #[tokio::test]
        async fn test_content_change_rolls_the_workload() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            let first = reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            store.modify_child(&cm2_ref(), |child| {
                child.data.insert("key2".to_string(), b"changed".to_vec());
            });
            let second = reconcile_workload(&store, &refreshed(&store, &workload), RETRIES)
                .await
                .unwrap();

            assert!(second.restarted);
            assert!(second.ownership.is_empty());
            assert_ne!(second.hash, first.hash);
            assert_eq!(hash_annotation(&store, &workload), second.hash);
        }

        #[tokio::test]
        async fn test_deleted_child_keeps_previous_fingerprint() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            let first = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            let workload_writes = store.workload_updates();

            store.remove_child(&s2_ref());
            let result = reconcile_workload(&store, &refreshed(&store, &workload), RETRIES).await;

            assert!(matches!(result, Err(ReconcilerError::MissingChild(ref id)) if *id == s2_ref()));
            assert_eq!(store.workload_updates(), workload_writes);
            assert_eq!(hash_annotation(&store, &workload), first.hash);
        }

        #[tokio::test]
        async fn test_metadata_only_change_does_not_roll() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            store.modify_child(&s1_ref(), |child| {
                child.owner_references.push(foreign_owner());
            });
            let second = reconcile_workload(&store, &refreshed(&store, &workload), RETRIES)
                .await
                .unwrap();
            assert!(!second.restarted);
        }
    }

    mod ownership_diff_tests {
        use super::*;

        #[tokio::test]
        async fn test_only_changed_references_are_touched() {
            let store = MemoryStore::new();
            seed_children(&store);
            store.modify_child(&s2_ref(), |child| {
                child.owner_references.push(foreign_owner());
            });
            store.insert_child(
                ConfigSource::from_config_map(&config_map("example3", &[("k", "v")])).unwrap(),
            );
            let workload = register(&store, &example_deployment());
            reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            // Swap the s2 envFrom for a new ConfigMap
            let mut changed = refreshed(&store, &workload);
            changed.template = ManagedWorkload::from_resource(&deployment(
                "example",
                "uid-example",
                vec![config_map_volume("example1"), secret_volume("example1")],
                vec![config_map_env_from("example2"), config_map_env_from("example3")],
            ))
            .unwrap()
            .template;
            let changed = store.insert_workload(changed);

            let outcome = reconcile_workload(&store, &changed, RETRIES).await.unwrap();
            assert_eq!(outcome.ownership.added, vec![ChildRef::config_map(NAMESPACE, "example3")]);
            assert_eq!(outcome.ownership.removed, vec![s2_ref()]);
            assert_eq!(outcome.children, 4);

            let s2 = store.child(&s2_ref()).unwrap();
            assert_eq!(s2.owner_references, vec![foreign_owner()]);
            assert!(store.child(&cm1_ref()).unwrap().has_owner("uid-example"));
        }

        #[tokio::test]
        async fn test_new_reference_adds_exactly_one_owner() {
            let store = MemoryStore::new();
            seed_children(&store);
            store.insert_child(
                ConfigSource::from_config_map(&config_map("example3", &[("k", "v")])).unwrap(),
            );
            let workload = register(&store, &example_deployment());
            reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            let child_writes = store.child_updates();

            let mut grown = refreshed(&store, &workload);
            grown.template = ManagedWorkload::from_resource(&deployment(
                "example",
                "uid-example",
                vec![config_map_volume("example1"), secret_volume("example1")],
                vec![
                    config_map_env_from("example2"),
                    secret_env_from("example2"),
                    config_map_env_from("example3"),
                ],
            ))
            .unwrap()
            .template;
            let grown = store.insert_workload(grown);

            let outcome = reconcile_workload(&store, &grown, RETRIES).await.unwrap();
            assert_eq!(outcome.ownership.added, vec![ChildRef::config_map(NAMESPACE, "example3")]);
            assert!(outcome.ownership.removed.is_empty());
            assert_eq!(outcome.children, 5);
            assert_eq!(store.child_updates(), child_writes + 1);
            assert!(outcome.restarted);
        }

        #[tokio::test]
        async fn test_child_shared_by_two_workloads() {
            let store = MemoryStore::new();
            seed_children(&store);
            let first = register(
                &store,
                &deployment("first", "uid-first", vec![config_map_volume("example1")], vec![]),
            );
            let second = register(
                &store,
                &deployment("second", "uid-second", vec![config_map_volume("example1")], vec![]),
            );
            reconcile_workload(&store, &first, RETRIES).await.unwrap();
            reconcile_workload(&store, &second, RETRIES).await.unwrap();

            let shared = store.child(&cm1_ref()).unwrap();
            assert!(shared.has_owner("uid-first"));
            assert!(shared.has_owner("uid-second"));

            let mut dropped = refreshed(&store, &second);
            dropped.template.spec.as_mut().unwrap().volumes = Some(vec![]);
            let dropped = store.insert_workload(dropped);
            let outcome = reconcile_workload(&store, &dropped, RETRIES).await.unwrap();

            assert!(outcome.ownership.added.is_empty());
            assert_eq!(outcome.ownership.removed, vec![cm1_ref()]);
            let shared = store.child(&cm1_ref()).unwrap();
            assert!(shared.has_owner("uid-first"));
            assert!(!shared.has_owner("uid-second"));
        }
    }

    mod conflict_tests {
        use super::*;

        #[tokio::test]
        async fn test_conflicts_within_budget_are_retried() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            store.inject_conflicts(RETRIES);

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert_eq!(outcome.ownership.added.len(), 4);
            assert!(outcome.restarted);
        }

        #[tokio::test]
        async fn test_exhausted_retries_surface_conflict() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            store.inject_conflicts(100);

            let err = reconcile_workload(&store, &workload, RETRIES).await.unwrap_err();
            match err {
                ReconcilerError::Conflict { attempts, .. } => assert_eq!(attempts, RETRIES + 1),
                other => panic!("expected Conflict, got {other:?}"),
            }
            assert_eq!(hash_annotation(&store, &workload), None);
        }

        #[tokio::test]
        async fn test_concurrent_workload_update_is_retried() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            // Someone else updates the workload after our snapshot was taken
            store.insert_workload(refreshed(&store, &workload));

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert!(outcome.finalizer_changed);
            assert!(outcome.restarted);
            assert_eq!(hash_annotation(&store, &workload), outcome.hash);
        }

        #[tokio::test]
        async fn test_workload_conflicts_within_budget_are_retried() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            store.inject_workload_conflicts(RETRIES);

            let outcome = reconcile_workload(&store, &workload, RETRIES).await.unwrap();
            assert!(outcome.restarted);
            assert!(refreshed(&store, &workload).has_finalizer());
        }

        #[tokio::test]
        async fn test_exhausted_workload_retries_surface_retryable_conflict() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            store.inject_workload_conflicts(100);

            let err = reconcile_workload(&store, &workload, RETRIES).await.unwrap_err();
            assert!(matches!(err, ReconcilerError::Conflict { attempts, .. } if attempts == RETRIES + 1));
            assert!(err.is_retryable());
            assert_eq!(store.child_updates(), 0);
        }
    }

    mod release_tests {
        use super::*;

        #[tokio::test]
        async fn test_release_drops_owner_references_and_keeps_annotation() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());
            let first = reconcile_workload(&store, &workload, RETRIES).await.unwrap();

            let outcome = release_children(&store, &refreshed(&store, &workload), RETRIES)
                .await
                .unwrap();
            assert_eq!(outcome.ownership.removed.len(), 4);
            assert!(outcome.finalizer_changed);
            assert!(!outcome.restarted);
            assert!(!refreshed(&store, &workload).has_finalizer());
            for child in stored_children(&store) {
                assert!(child.owner_references.is_empty());
            }
            assert_eq!(hash_annotation(&store, &workload), first.hash);
        }

        #[tokio::test]
        async fn test_release_without_owned_children_is_a_no_op() {
            let store = MemoryStore::new();
            seed_children(&store);
            let workload = register(&store, &example_deployment());

            let outcome = release_children(&store, &workload, RETRIES).await.unwrap();
            assert_eq!(outcome.mutations(), 0);
            assert_eq!(store.child_updates(), 0);
        }
    }

    mod controller_entry_tests {
        use super::*;
        use k8s_openapi::api::apps::v1::Deployment;

        fn context(
            store: Arc<MemoryStore>,
            events: Arc<RecordingEventPublisher>,
            config: ControllerConfig,
        ) -> Arc<Reconciler> {
            Arc::new(Reconciler::with_config(store, events, config))
        }

        fn not_opted_in() -> Deployment {
            let mut deployment = example_deployment();
            if let Some(annotations) = deployment.metadata.annotations.as_mut() {
                annotations.remove(UPDATE_ON_CONFIG_CHANGE_ANNOTATION);
            }
            deployment
        }

        #[tokio::test]
        async fn test_reconcile_emits_config_changed_event() {
            let store = Arc::new(MemoryStore::new());
            let events = Arc::new(RecordingEventPublisher::new());
            seed_children(&store);
            let deployment = example_deployment();
            let workload = register(&store, &deployment);
            let ctx = context(store.clone(), events.clone(), ControllerConfig::default());

            reconcile(Arc::new(deployment), ctx).await.unwrap();
            assert_eq!(events.reasons(), vec![reasons::CONFIG_CHANGED.to_string()]);
            assert!(hash_annotation(&store, &workload).is_some());
        }

        #[tokio::test]
        async fn test_not_opted_in_workload_is_left_alone() {
            let store = Arc::new(MemoryStore::new());
            let events = Arc::new(RecordingEventPublisher::new());
            seed_children(&store);
            let deployment = not_opted_in();
            let workload = register(&store, &deployment);
            let ctx = context(store.clone(), events.clone(), ControllerConfig::default());

            for _ in 0..10 {
                reconcile(Arc::new(deployment.clone()), Arc::clone(&ctx)).await.unwrap();
            }
            assert!(events.events().is_empty());
            assert_eq!(store.child_updates(), 0);
            assert_eq!(store.child_lists(), 0);
            assert_eq!(hash_annotation(&store, &workload), None);
        }

        #[tokio::test]
        async fn test_opt_in_can_be_disabled() {
            let store = Arc::new(MemoryStore::new());
            let events = Arc::new(RecordingEventPublisher::new());
            seed_children(&store);
            let deployment = not_opted_in();
            let workload = register(&store, &deployment);
            let config = ControllerConfig {
                require_opt_in: false,
                ..ControllerConfig::default()
            };
            let ctx = context(store.clone(), events.clone(), config);

            reconcile(Arc::new(deployment), ctx).await.unwrap();
            assert_eq!(store.child_updates(), 4);
            assert!(hash_annotation(&store, &workload).is_some());
        }

        #[tokio::test]
        async fn test_failure_emits_warning_event() {
            let store = Arc::new(MemoryStore::new());
            let events = Arc::new(RecordingEventPublisher::new());
            seed_children(&store);
            store.remove_child(&cm1_ref());
            let deployment = example_deployment();
            register(&store, &deployment);
            let ctx = context(store.clone(), events.clone(), ControllerConfig::default());

            let err = reconcile(Arc::new(deployment), ctx).await.unwrap_err();
            assert!(matches!(err, ReconcilerError::MissingChild(_)));
            let recorded = events.events();
            assert_eq!(recorded.len(), 1);
            assert!(recorded[0].warning);
            assert_eq!(recorded[0].reason, reasons::RECONCILE_FAILED);
        }
    }
}
