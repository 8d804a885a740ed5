// Property-based tests for the failure policy and job variants
// Feature: cronbind

use common::errors::InvocationError;
use common::guard::{
    decide, Disposition, FailureKind, RemovalFlags, FORCE_KEEP_KEY, REMOVE_ON_ERROR_KEY,
};
use common::scheduler::JobDataMap;
use common::variant::{Concurrency, JobVariant, Persistence};
use proptest::prelude::*;

fn failure_kind() -> impl Strategy<Value = FailureKind> {
    prop::sample::select(vec![
        FailureKind::Access,
        FailureKind::IllegalArgument,
        FailureKind::Target,
        FailureKind::Unexpected,
    ])
}

/// **Property 7: Access and argument failures always remove**
///
/// *For any* combination of flags, a job whose method cannot be reached or
/// called with its arguments is removed.
#[test]
fn property_structural_failures_always_remove() {
    proptest!(|(remove_on_error in any::<bool>(), force_keep in any::<bool>())| {
        let flags = RemovalFlags { remove_on_error, force_keep };
        prop_assert_eq!(decide(FailureKind::Access, flags), Disposition::Remove);
        prop_assert_eq!(decide(FailureKind::IllegalArgument, flags), Disposition::Remove);
    });
}

/// **Property 8: Force-keep wins over remove-on-error**
///
/// *For any* failure raised by the method itself or by a panic, force-keep
/// keeps the job regardless of remove-on-error.
#[test]
fn property_force_keep_wins() {
    proptest!(|(remove_on_error in any::<bool>())| {
        let flags = RemovalFlags { remove_on_error, force_keep: true };
        prop_assert_eq!(decide(FailureKind::Target, flags), Disposition::Keep);
        prop_assert_eq!(decide(FailureKind::Unexpected, flags), Disposition::Keep);
    });
}

/// **Property 9: Method failures follow remove-on-error**
///
/// *For any* method failure without force-keep, the job is removed exactly
/// when remove-on-error is set; other uncaught failures always remove.
#[test]
fn property_method_failures_follow_remove_on_error() {
    proptest!(|(remove_on_error in any::<bool>())| {
        let flags = RemovalFlags { remove_on_error, force_keep: false };
        let expected = if remove_on_error { Disposition::Remove } else { Disposition::Keep };
        prop_assert_eq!(decide(FailureKind::Target, flags), expected);
        prop_assert_eq!(decide(FailureKind::Unexpected, flags), Disposition::Remove);
    });
}

/// **Property 10: Flags round-trip through job data**
///
/// *For any* stored flag pair, the guard reads back the same flags, and the
/// failure kind of any error is stable.
#[test]
fn property_flags_read_from_job_data() {
    proptest!(|(
        remove_on_error in any::<bool>(),
        force_keep in any::<bool>(),
        kind in failure_kind()
    )| {
        let mut data = JobDataMap::new();
        data.insert(REMOVE_ON_ERROR_KEY.to_string(), serde_json::Value::Bool(remove_on_error));
        data.insert(FORCE_KEEP_KEY.to_string(), serde_json::Value::Bool(force_keep));

        let flags = RemovalFlags::from_job_data(&data);
        prop_assert_eq!(flags, RemovalFlags { remove_on_error, force_keep });

        let error = match kind {
            FailureKind::Access => InvocationError::Access("t.m".to_string()),
            FailureKind::IllegalArgument => InvocationError::IllegalArgument {
                method: "t.m".to_string(),
                position: 0,
                expected: "u32",
            },
            FailureKind::Target => InvocationError::Target(anyhow::anyhow!("failed")),
            FailureKind::Unexpected => InvocationError::Unexpected("panic".to_string()),
        };
        prop_assert_eq!(FailureKind::of(&error), kind);
    });
}

/// **Property 11: Variant selection**
///
/// *For any* pair of policy flags, the selected variant carries exactly those
/// two flags and nothing else.
#[test]
fn property_variant_selection() {
    proptest!(|(allow_concurrent in any::<bool>(), persistent in any::<bool>())| {
        let variant = JobVariant::select(allow_concurrent, persistent);
        prop_assert_eq!(variant.allows_concurrent_execution(), allow_concurrent);
        prop_assert_eq!(variant.persists_job_data(), persistent);
        prop_assert_eq!(
            variant.concurrency == Concurrency::NonConcurrent,
            !allow_concurrent
        );
        prop_assert_eq!(variant.persistence == Persistence::Persistent, persistent);
    });
}
