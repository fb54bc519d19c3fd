use proptest::prelude::*;
use smilefit_core::au::{round_output, AuExtractor, AU_DEFINITIONS, WEIGHTED_SUFFIX};
use smilefit_core::{FeatureSchema, Landmark, LandmarkSet, SimilarityScorer};

fn mesh(len: usize) -> impl Strategy<Value = LandmarkSet> {
    prop::collection::vec((0.0f32..1000.0, 0.0f32..1000.0, -50.0f32..50.0), len)
        .prop_map(|pts| LandmarkSet::new(pts.into_iter().map(|(x, y, z)| Landmark::new(x, y, z)).collect()))
}

fn extractor() -> AuExtractor {
    AuExtractor::with_schema(FeatureSchema::default_au())
}

#[test]
fn extraction_is_deterministic() {
    proptest!(|(set in mesh(468))| {
        let ex = extractor();
        prop_assert_eq!(ex.extract(Some(&set)), ex.extract(Some(&set)));
    });
}

#[test]
fn output_keys_match_schema_for_any_point_count() {
    proptest!(|(len in 0usize..500, seed in 0.0f32..100.0)| {
        let points = (0..len).map(|i| Landmark::new(seed + i as f32, seed * 2.0 - i as f32, 0.0)).collect();
        let ex = extractor();
        let fv = ex.extract(Some(&LandmarkSet::new(points)));
        let keys: Vec<&str> = fv.keys().collect();
        let mut expected: Vec<&str> = ex.schema().keys().iter().map(String::as_str).collect();
        expected.sort_unstable();
        prop_assert_eq!(keys, expected);
        prop_assert!(fv.iter().all(|(_, v)| v.is_finite()));
    });
}

#[test]
fn extraction_ignores_uniform_scale() {
    // Powers of two keep the scaled coordinates exact.
    proptest!(|(set in mesh(468), factor in prop::sample::select(vec![0.25f32, 0.5, 2.0, 4.0]))| {
        let ex = extractor();
        prop_assert_eq!(ex.extract(Some(&set)), ex.extract(Some(&set.scaled(factor))));
    });
}

#[test]
fn weighted_twin_follows_base() {
    proptest!(|(set in mesh(468), weight in 0.0f64..2.0)| {
        let ex = AuExtractor::new(FeatureSchema::default_au(), weight).unwrap();
        let fv = ex.extract(Some(&set));
        for def in &AU_DEFINITIONS {
            let base = fv.value(def.key);
            let weighted = fv.value(&format!("{}{WEIGHTED_SUFFIX}", def.key));
            prop_assert_eq!(weighted, round_output(base * weight));
        }
    });
}

#[test]
fn similarity_is_bounded() {
    proptest!(|(a in prop::collection::vec(-100.0f32..100.0, 12), b in prop::collection::vec(-100.0f32..100.0, 12))| {
        let s = SimilarityScorer::default().similarity(&a, &b).unwrap();
        prop_assert!((0.0..=100.0).contains(&s));
        prop_assert_eq!(SimilarityScorer::default().similarity(&a, &a).unwrap(), 100.0);
    });
}

#[test]
fn similarity_decreases_with_distance() {
    proptest!(|(near in 0.0f64..50.0, extra in 0.01f64..50.0, decay in 0.01f64..2.0)| {
        let s = SimilarityScorer::new(decay).unwrap();
        prop_assert!(s.score_for_distance(near + extra) < s.score_for_distance(near));
    });
}
