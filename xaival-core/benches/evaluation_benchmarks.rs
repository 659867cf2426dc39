use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use xaival_core::evaluator::{EvaluationContext, Evaluator};
use xaival_core::explainer::{GradientConfig, GradientExplainer};
use xaival_core::model::LogisticRegression;
use xaival_core::perturbation::{NormalPerturbation, PerturbationConfig, Perturber};
use xaival_core::{EvaluationSettings, FeatureTypes, Metric};

const DIM: usize = 13;

fn bench_perturbation(c: &mut Criterion) {
    let perturber = NormalPerturbation::new(PerturbationConfig::default()).unwrap();
    let types = FeatureTypes::from_tags("ccccdcccdcccc").unwrap();
    let x: Vec<f64> = (0..DIM).map(|i| i as f64 * 0.1).collect();

    c.bench_function("perturb_1000_samples", |b| {
        let mut rng = StdRng::seed_from_u64(0);
        b.iter(|| {
            perturber
                .perturb(black_box(&x), &types, 1000, &mut rng)
                .unwrap()
        })
    });
}

fn bench_metrics(c: &mut Criterion) {
    let weights: Vec<f64> = (0..DIM).map(|i| 0.1 * i as f64 - 0.5).collect();
    let model = Arc::new(
        LogisticRegression::new(vec![vec![0.0; DIM], weights], vec![0.0, 0.2]).unwrap(),
    );
    let explainer =
        Arc::new(GradientExplainer::new(model.clone(), GradientConfig::default()).unwrap());
    let perturber = Arc::new(NormalPerturbation::new(PerturbationConfig::default()).unwrap());
    let context = EvaluationContext::builder(model, explainer, perturber)
        .input(vec![0.3; DIM])
        .settings(EvaluationSettings {
            seed: Some(1),
            ..EvaluationSettings::default()
        })
        .build()
        .unwrap();
    let evaluator = Evaluator::new(context);

    for metric in [Metric::Pgi, Metric::Ris, Metric::Ros] {
        c.bench_function(&format!("evaluate_{}", metric.name().to_lowercase()), |b| {
            b.iter(|| evaluator.evaluate(black_box(metric)).unwrap())
        });
    }
}

criterion_group!(benches, bench_perturbation, bench_metrics);
criterion_main!(benches);
