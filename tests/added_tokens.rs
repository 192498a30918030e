use tokenweave::{
    AddedToken, AddedVocabulary, Bpe, MergeTable, Normalizer, Segment, Tokenizer, Vocab,
};

fn matched_spans(added: &AddedVocabulary, text: &str) -> Vec<(usize, usize)> {
    added
        .split(text, false)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Matched { span, .. } => Some(span),
            Segment::Literal(_) => None,
        })
        .collect()
}

fn vocabulary(tokens: &[AddedToken]) -> AddedVocabulary {
    let mut added = AddedVocabulary::new();
    added.add_tokens(tokens, &Bpe::default()).unwrap();
    added
}

fn char_model() -> Bpe {
    let vocab: Vocab = ["[UNK]", "a", "e", "h", "i", "k", "l", "n", "o", "s", "t", "w", "z", "g", "I"]
        .into_iter()
        .collect();
    Bpe::builder()
        .vocab_and_merges(vocab, MergeTable::new())
        .unk_token("[UNK]")
        .build()
        .unwrap()
}

#[test]
fn test_single_word_respects_word_boundaries() {
    let added = vocabulary(&[AddedToken::from("ing", true).single_word(true)]);

    assert!(matched_spans(&added, "tokenizing").is_empty());
    assert_eq!(matched_spans(&added, "ing"), vec![(0, 3)]);
    assert_eq!(matched_spans(&added, "an ing, a"), vec![(3, 6)]);

    let plain = vocabulary(&[AddedToken::from("ing", true)]);
    assert_eq!(matched_spans(&plain, "tokenizing"), vec![(7, 10)]);
}

#[test]
fn test_single_word_checks_outside_characters_only() {
    // Punctuation at the token's own edges does not exempt it.
    let added = vocabulary(&[AddedToken::from("<x>", true).single_word(true)]);
    assert!(matched_spans(&added, "a<x>b").is_empty());
    assert!(matched_spans(&added, "a<x> b").is_empty());
    assert_eq!(matched_spans(&added, "a <x>, b"), vec![(2, 5)]);
    assert_eq!(matched_spans(&added, "<x>"), vec![(0, 3)]);
}

#[test]
fn test_lstrip_includes_preceding_space() {
    let added = vocabulary(&[AddedToken::from("[MASK]", true).lstrip(true)]);
    let text = "I saw a [MASK]";
    let spans = matched_spans(&added, text);

    assert_eq!(spans, vec![(7, 14)]);
    assert_eq!(&text[7..14], " [MASK]");
}

#[test]
fn test_strip_stops_at_previous_match() {
    let added = vocabulary(&[
        AddedToken::from("<a>", true).rstrip(true),
        AddedToken::from("<b>", true).lstrip(true),
    ]);
    // "<a>" already absorbed the spaces; "<b>" starts right after it.
    assert_eq!(matched_spans(&added, "<a>   <b>"), vec![(0, 6), (6, 9)]);
}

#[test]
fn test_strip_through_tokenizer() {
    let mut tokenizer = Tokenizer::new(char_model());
    tokenizer
        .add_special_tokens(&[AddedToken::from("[MASK]", true).lstrip(true)])
        .unwrap();

    let encoding = tokenizer.encode("I saw a [MASK]", false).unwrap();
    assert_eq!(encoding.get_tokens(), &["I", "s", "a", "w", "a", "[MASK]"]);
    assert_eq!(encoding.get_offsets()[5], (7, 14));
    assert_eq!(encoding.get_special_tokens_mask(), &[0, 0, 0, 0, 0, 1]);
}

#[test]
fn test_raw_and_normalized_matching() {
    let mut tokenizer = Tokenizer::new(char_model()).with_normalizer(Normalizer::Lowercase);
    tokenizer
        .add_special_tokens(&[AddedToken::from("[MASK]", true)])
        .unwrap();
    tokenizer.add_tokens(&[AddedToken::from("hello", false)]).unwrap();

    let encoding = tokenizer.encode("HELLO [MASK] [mask]", false).unwrap();
    let tokens = encoding.get_tokens();

    // "hello" matches after lowercasing, with offsets on the raw input.
    assert_eq!(tokens[0], "hello");
    assert_eq!(encoding.get_offsets()[0], (0, 5));
    // The raw special token matches exactly; its lowercased form does not.
    assert_eq!(tokens[1], "[MASK]");
    assert_eq!(encoding.get_offsets()[1], (6, 12));
    assert_eq!(tokens.iter().filter(|t| *t == "[MASK]").count(), 1);
}

#[test]
fn test_longest_match_and_insertion_order() {
    let added = vocabulary(&[
        AddedToken::from("<|end|>", true),
        AddedToken::from("<|end|><|pad|>", true),
        AddedToken::from("<|pad|>", true),
    ]);
    assert_eq!(added.token_to_id("<|end|>"), Some(0));
    assert_eq!(added.token_to_id("<|pad|>"), Some(2));

    let segments = added.split("x<|end|><|pad|>y", false);
    assert_eq!(
        segments,
        vec![
            Segment::Literal((0, 1)),
            Segment::Matched {
                id: 1,
                span: (1, 15)
            },
            Segment::Literal((15, 16)),
        ]
    );
}

#[test]
fn test_added_tokens_from_json() {
    let tokens: Vec<AddedToken> = serde_json::from_str(
        r#"[
            "<new>",
            {"content": "[MASK]", "lstrip": true, "special": true},
            {"content": "ing", "single_word": true, "normalized": false}
        ]"#,
    )
    .unwrap();

    assert_eq!(tokens[0].content, "<new>");
    assert!(tokens[0].normalized && !tokens[0].special);
    assert!(tokens[1].lstrip && tokens[1].special && !tokens[1].normalized);
    assert!(tokens[2].single_word && !tokens[2].normalized);
}
