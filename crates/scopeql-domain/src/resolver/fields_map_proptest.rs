//! Property-based tests for permission composition and fields maps.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use proptest::prelude::*;
    use proptest::sample::subsequence;
    use serde_json::json;

    use crate::error::DomainError;
    use crate::model::{AdditionalField, ModelConfig, ModelSchema, Registry, Row};
    use crate::resolver::{
        Action, ActionSet, FieldOperation, FieldSet, PermissionProvider, PermissionResolver,
        RequestContext, ResolverConfig, UnknownFieldPolicy,
    };
    use crate::validation::PredicateValidator;

    const DOC_FIELDS: &[&str] = &["id", "title", "body", "owner", "tags", "score"];
    const LOOKUPS: &[&str] = &["", "__exact", "__gt", "__in", "__isnull", "__icontains"];

    /// Provider granting a fixed field list, optionally gated on read.
    #[derive(Debug, Clone)]
    struct Grant {
        grants_read: bool,
        fields: Vec<String>,
    }

    impl PermissionProvider for Grant {
        fn allowed_actions(&self, _: &RequestContext, _: &str) -> ActionSet {
            if self.grants_read {
                [Action::Read].into_iter().collect()
            } else {
                [Action::Create].into_iter().collect()
            }
        }
        fn allowed_fields(&self, _: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
            FieldSet::only(self.fields.iter().cloned())
        }
        fn allowed_object_actions(&self, _: &RequestContext, _: &str, _: &Row) -> ActionSet {
            ActionSet::new()
        }
    }

    fn grant_strategy(fields: &'static [&'static str]) -> impl Strategy<Value = Grant> {
        (any::<bool>(), subsequence(fields.to_vec(), 0..=fields.len())).prop_map(
            |(grants_read, fields)| Grant {
                grants_read,
                fields: fields.into_iter().map(str::to_string).collect(),
            },
        )
    }

    fn doc_resolver(grants: Vec<Grant>) -> PermissionResolver {
        let config = grants.into_iter().fold(
            ModelConfig::new().with_additional_field(AdditionalField::new("score", |_| json!(0))),
            |config, grant| config.with_provider(grant),
        );
        let registry = Registry::builder()
            .register(
                ModelSchema::new("doc", "id")
                    .scalar("title")
                    .scalar("body")
                    .scalar("owner")
                    .json("tags"),
                config,
            )
            .and_then(|b| b.build())
            .unwrap();
        PermissionResolver::new(
            Arc::new(registry),
            Arc::new(RequestContext::anonymous()),
            ResolverConfig::default(),
        )
    }

    const CHAIN_FIELDS: &[&str] = &["id", "name", "next"];

    /// a -> b -> c -> d -> a, each hop through a field called `next`.
    fn chain_resolver(grants: Vec<Grant>) -> PermissionResolver {
        let names = ["a", "b", "c", "d"];
        let mut builder = Ok(Registry::builder());
        for (i, grant) in grants.into_iter().enumerate() {
            let schema = ModelSchema::new(names[i], "id")
                .scalar("name")
                .to_one("next", names[(i + 1) % names.len()]);
            builder = builder.and_then(|b| b.register(schema, ModelConfig::new().with_provider(grant)));
        }
        let registry = builder.and_then(|b| b.build()).unwrap();
        PermissionResolver::new(
            Arc::new(registry),
            Arc::new(RequestContext::anonymous()),
            ResolverConfig::default().with_unknown_fields(UnknownFieldPolicy::Ignore),
        )
    }

    proptest! {
        #[test]
        fn test_adding_a_provider_never_shrinks_the_field_set(
            first in grant_strategy(DOC_FIELDS),
            second in grant_strategy(DOC_FIELDS),
        ) {
            let second_grants_read = second.grants_read;
            let second_fields: BTreeSet<String> = second.fields.iter().cloned().collect();
            let first_copy = first.clone();

            let alone = doc_resolver(vec![first]).fields("doc", FieldOperation::Read).unwrap();
            let both = doc_resolver(vec![first_copy, second])
                .fields("doc", FieldOperation::Read)
                .unwrap();

            prop_assert!(alone.is_subset(&both));
            if !second_grants_read {
                prop_assert_eq!(alone, both);
            } else {
                prop_assert!(second_fields.iter().all(|f| both.contains(f)));
            }
        }

        #[test]
        fn test_filtering_on_a_computed_field_is_always_a_validation_error(
            grant in grant_strategy(DOC_FIELDS),
            lookup in proptest::sample::select(LOOKUPS.to_vec()),
        ) {
            let resolver = doc_resolver(vec![grant]);
            let validator = PredicateValidator::new(&resolver);
            let result = validator.validate_filterable("doc", &format!("score{lookup}"));
            prop_assert!(
                matches!(result, Err(DomainError::Validation { .. })),
                "got {:?}", result
            );
        }

        #[test]
        fn test_explicit_path_agrees_with_eager_expansion(
            a in grant_strategy(CHAIN_FIELDS),
            b in grant_strategy(CHAIN_FIELDS),
            c in grant_strategy(CHAIN_FIELDS),
            d in grant_strategy(CHAIN_FIELDS),
        ) {
            let resolver = chain_resolver(vec![a, b, c, d]);

            let eager = resolver.fields_map("a", FieldOperation::Read, 3, &[]).unwrap();
            let explicit = resolver
                .fields_map("a", FieldOperation::Read, 0, &["next__next__next".to_string()])
                .unwrap();

            prop_assert_eq!(eager.get("d"), explicit.get("d"));
        }
    }
}
