//! Encoding through the full pipeline.

use tokenweave::{AddedToken, Bpe, BpeTrainer, MergeTable, Model, Tokenizer, Vocab};

fn tiny_model(cache_capacity: usize) -> Bpe {
    let vocab = Vocab::from_json(
        r#"{"[UNK]":0,"l":1,"o":2,"w":3,"e":4,"r":5,"lo":6,"low":7,"er":8,"lower":9,"n":10}"#,
    )
    .unwrap();
    let merges = MergeTable::parse("#version: 0.2\nl o\nlo w\ne r\nlow er\n").unwrap();
    Bpe::builder()
        .vocab_and_merges(vocab, merges)
        .unk_token("[UNK]")
        .cache_capacity(cache_capacity)
        .build()
        .unwrap()
}

#[test]
fn test_trained_end_to_end() {
    let mut tokenizer = Tokenizer::new(Bpe::builder().unk_token("[UNK]").build().unwrap());
    let mut trainer = BpeTrainer::builder()
        .vocab_size(100)
        .show_progress(false)
        .special_tokens(vec!["[UNK]", "[CLS]", "[SEP]", "[PAD]", "[MASK]"])
        .build();
    let corpus = [
        "Hello, y'all!",
        "How are you?",
        "Hello, how are you all?",
        "You all are here!",
    ];
    tokenizer.train(&mut trainer, corpus.iter()).unwrap();

    let encoding = tokenizer
        .encode("Hello, y'all! How are you 😁 ?", false)
        .unwrap();
    assert_eq!(
        encoding.get_tokens(),
        &["Hello", ",", "y", "'", "all", "!", "How", "are", "you", "[UNK]", "?"]
    );
    assert_eq!(encoding.get_offsets()[9], (26, 30));
    assert_eq!(tokenizer.token_to_id("[UNK]"), Some(0));
    assert_eq!(tokenizer.token_to_id("[MASK]"), Some(4));
}

#[test]
fn test_lower_rank_merge_wins_regardless_of_position() {
    // l o w e r -> lo w e r -> low e r -> low er -> lower
    let model = tiny_model(100);
    let tokens: Vec<String> = model
        .tokenize("lower")
        .unwrap()
        .into_iter()
        .map(|t| t.value)
        .collect();
    assert_eq!(tokens, vec!["lower"]);

    // "a b" is leftmost but "b c" was learned first.
    let vocab = Vocab::from_json(r#"{"a":0,"b":1,"c":2,"ab":3,"bc":4}"#).unwrap();
    let merges = MergeTable::parse("b c\na b\n").unwrap();
    let model = Bpe::new(vocab, merges).unwrap();
    let values: Vec<String> = model
        .tokenize("abc")
        .unwrap()
        .into_iter()
        .map(|t| t.value)
        .collect();
    assert_eq!(values, vec!["a", "bc"]);
}

#[test]
fn test_repeated_encoding_is_stable() {
    let tokenizer = Tokenizer::new(tiny_model(100));
    let text = "lower low lowest newer lower";
    let first = tokenizer.encode(text, false).unwrap();
    for _ in 0..5 {
        assert_eq!(tokenizer.encode(text, false).unwrap(), first);
    }
    assert!(tokenizer.model().cache_len() > 0);
}

#[test]
fn test_cache_does_not_change_results() {
    let cached = Tokenizer::new(tiny_model(2));
    let uncached = Tokenizer::new(tiny_model(0));
    let inputs = ["lower", "low", "lowlow", "rewol", "lower low", "nol", "lower"];

    for _ in 0..3 {
        for input in inputs {
            assert_eq!(
                cached.encode(input, false).unwrap(),
                uncached.encode(input, false).unwrap()
            );
        }
    }
    assert!(cached.model().cache_len() <= 2);
    assert_eq!(uncached.model().cache_len(), 0);
}

#[test]
fn test_offsets_valid_and_ordered() {
    let mut tokenizer = Tokenizer::new(tiny_model(100));
    tokenizer
        .add_special_tokens(&[AddedToken::from("<sep>", true).lstrip(true).rstrip(true)])
        .unwrap();

    let text = "lower  <sep>  élan, low";
    let encoding = tokenizer.encode(text, false).unwrap();
    let offsets = encoding.get_offsets();

    assert_eq!(offsets.len(), encoding.get_ids().len());
    assert_eq!(offsets.len(), encoding.get_tokens().len());
    let mut previous = 0;
    for &(start, end) in offsets {
        assert!(start <= end && end <= text.len());
        assert!(start >= previous);
        assert!(text.is_char_boundary(start) && text.is_char_boundary(end));
        previous = start;
    }
    assert!(encoding.get_tokens().contains(&"<sep>".to_string()));
}

#[test]
fn test_concurrent_encoding() {
    let tokenizer = Tokenizer::new(tiny_model(8));
    let expected = tokenizer.encode("lower low er", false).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    assert_eq!(tokenizer.encode("lower low er", false).unwrap(), expected);
                }
            });
        }
    });
}

#[test]
fn test_dropout_keeps_text_intact() {
    let vocab = Vocab::from_json(r#"{"l":0,"o":1,"w":2,"lo":3,"low":4}"#).unwrap();
    let merges = MergeTable::parse("l o\nlo w\n").unwrap();
    let model = Bpe::builder()
        .vocab_and_merges(vocab, merges)
        .dropout(0.5)
        .build()
        .unwrap();

    for _ in 0..20 {
        let joined: String = model
            .tokenize("lowlow")
            .unwrap()
            .into_iter()
            .map(|t| t.value)
            .collect();
        assert_eq!(joined, "lowlow");
    }
    assert_eq!(model.cache_len(), 0);
}
