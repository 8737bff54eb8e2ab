use pretty_assertions::assert_eq;
use relay_core::{
    cache_defeat, plan_batch, BatchError, BatchPolicy, OutboundMessage, TextPlacement,
};

fn urls(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("https://cdn.example.com/p{i}.jpg")).collect()
}

fn image_urls(messages: &[OutboundMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            OutboundMessage::Image {
                original_content_url,
                ..
            } => Some(original_content_url.clone()),
            OutboundMessage::Text { .. } => None,
        })
        .collect()
}

#[test]
fn six_images_with_text_keep_text_and_first_four() {
    let images = urls(6);
    let batch = plan_batch(Some("hello"), &images, &BatchPolicy::default(), None).unwrap();

    assert_eq!(batch.len(), 5);
    assert_eq!(batch.dropped_images, 2);
    assert_eq!(batch.messages[0], OutboundMessage::text("hello"));
    assert_eq!(image_urls(&batch.messages), images[..4].to_vec());
}

#[test]
fn images_only_fill_the_whole_cap() {
    let images = urls(7);
    let batch = plan_batch(None, &images, &BatchPolicy::default(), None).unwrap();
    assert_eq!(batch.len(), 5);
    assert_eq!(batch.dropped_images, 2);
    assert!(batch.messages.iter().all(|m| !m.is_text()));
}

#[test]
fn text_can_be_placed_after_images() {
    let policy = BatchPolicy {
        text_placement: TextPlacement::After,
        ..BatchPolicy::default()
    };
    let batch = plan_batch(Some("summary"), &urls(2), &policy, None).unwrap();
    assert_eq!(batch.len(), 3);
    assert!(!batch.messages[0].is_text());
    assert_eq!(batch.messages[2], OutboundMessage::text("summary"));
}

#[test]
fn cap_of_one_with_text_sends_text_only() {
    let policy = BatchPolicy {
        max_messages: 1,
        ..BatchPolicy::default()
    };
    let batch = plan_batch(Some("t"), &urls(3), &policy, None).unwrap();
    assert_eq!(batch.messages, vec![OutboundMessage::text("t")]);
    assert_eq!(batch.dropped_images, 3);
}

#[test]
fn blank_text_is_treated_as_absent() {
    let batch = plan_batch(Some("   "), &urls(1), &BatchPolicy::default(), None).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.image_count(), 1);
}

#[test]
fn empty_input_is_rejected() {
    let err = plan_batch(None, &[], &BatchPolicy::default(), None).unwrap_err();
    assert_eq!(err, BatchError::Empty);
}

#[test]
fn zero_capacity_is_rejected() {
    let policy = BatchPolicy {
        max_messages: 0,
        ..BatchPolicy::default()
    };
    let err = plan_batch(Some("t"), &[], &policy, None).unwrap_err();
    assert_eq!(err, BatchError::ZeroCapacity);
}

#[test]
fn stamps_make_repeated_batches_textually_distinct() {
    let images = urls(2);
    let first = plan_batch(None, &images, &BatchPolicy::default(), Some("1000")).unwrap();
    let second = plan_batch(None, &images, &BatchPolicy::default(), Some("2000")).unwrap();

    let first_urls = image_urls(&first.messages);
    let second_urls = image_urls(&second.messages);
    assert_eq!(first_urls[0], "https://cdn.example.com/p1.jpg?cb=1000-1");
    assert_eq!(first_urls[1], "https://cdn.example.com/p2.jpg?cb=1000-2");
    for (a, b) in first_urls.iter().zip(&second_urls) {
        assert_ne!(a, b);
    }
}

#[test]
fn preview_url_matches_primary_url() {
    let batch = plan_batch(None, &urls(1), &BatchPolicy::default(), Some("7")).unwrap();
    match &batch.messages[0] {
        OutboundMessage::Image {
            original_content_url,
            preview_image_url,
        } => assert_eq!(original_content_url, preview_image_url),
        other => panic!("expected image, got {other:?}"),
    }
}

#[test]
fn cache_defeat_keeps_existing_signature_query() {
    let signed = "https://export.example.com/a.jpg?X-Sig=abc&Expires=10";
    assert_eq!(
        cache_defeat(signed, "42", 3),
        "https://export.example.com/a.jpg?X-Sig=abc&Expires=10&cb=42-3"
    );
}

#[test]
fn cache_defeat_handles_unparseable_urls() {
    assert_eq!(cache_defeat("/relative/img.png", "9", 1), "/relative/img.png?cb=9-1");
    assert_eq!(
        cache_defeat("/relative/img.png?a=1#top", "9", 2),
        "/relative/img.png?a=1&cb=9-2#top"
    );
}
