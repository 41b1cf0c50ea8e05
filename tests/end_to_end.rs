use std::ops::ControlFlow;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rnn_textgen::{
    checkpoint, evaluate, sample, train, CellKind, Corpus, Network, NetworkConfig, SampleConfig, TrainConfig,
};

fn abab() -> Corpus {
    Corpus::from_bytes(&b"ab".repeat(1000)).unwrap()
}

fn network(cell: CellKind, corpus: &Corpus) -> Network {
    let config = NetworkConfig { cell, n_in: corpus.alphabet.len(), n_hidden: 16, n_layers: 1, dropout: 0.0 };
    Network::new(config, &mut ChaCha8Rng::seed_from_u64(11)).unwrap()
}

#[test]
fn test_one_epoch_lowers_cost() {
    let corpus = abab();
    let config = TrainConfig { learning_rate: 0.01, unroll: 8, batch_size: 4, max_epochs: 1, ..TrainConfig::default() };
    for cell in [CellKind::Rnn, CellKind::Lstm, CellKind::Gru] {
        let mut net = network(cell, &corpus);
        let before = evaluate(&net, &corpus, 8, 4).unwrap();
        let summary = train(&mut net, &corpus, &config, &mut ChaCha8Rng::seed_from_u64(1), |_| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(summary.epochs, 1);
        let after = evaluate(&net, &corpus, 8, 4).unwrap();
        assert!(after < before, "{}: {} -> {}", cell, before, after);
    }
}

#[test]
fn test_trained_model_alternates() {
    let corpus = abab();
    let mut net = network(CellKind::Gru, &corpus);
    let config = TrainConfig { unroll: 8, batch_size: 4, max_epochs: 3, ..TrainConfig::default() };
    train(&mut net, &corpus, &config, &mut ChaCha8Rng::seed_from_u64(2), |_| ControlFlow::Continue(())).unwrap();

    let cold = SampleConfig { temperature: 0.05, length: 40, seed: Some(b'a') };
    let text = sample(&net, &corpus.alphabet, &cold, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
    assert_eq!(text, b"ba".repeat(20));
}

#[test]
fn test_checkpoint_reproduces_samples() {
    let corpus = Corpus::from_bytes(&b"to be or not to be, that is the question. ".repeat(8)).unwrap();
    let mut net = network(CellKind::Lstm, &corpus);
    let config = TrainConfig { unroll: 6, batch_size: 4, max_epochs: 1, ..TrainConfig::default() };
    train(&mut net, &corpus, &config, &mut ChaCha8Rng::seed_from_u64(4), |_| ControlFlow::Continue(())).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.bin");
    checkpoint::save(&path, &net, &corpus.alphabet, serde_json::json!({"epoch": 1})).unwrap();
    let (restored, alphabet) = checkpoint::load(&path).unwrap();
    assert_eq!(alphabet, corpus.alphabet);

    let config = SampleConfig { length: 300, ..SampleConfig::default() };
    let a = sample(&net, &corpus.alphabet, &config, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
    let b = sample(&restored, &alphabet, &config, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
    assert_eq!(a, b);
}
