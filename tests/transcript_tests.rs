use duplex::kernel::feed::LogFeed;
use duplex::kernel::transcript::TranscriptAggregator;
use duplex::{LogEntry, LogSource};

#[test]
fn test_deltas_concatenate_into_one_entry_per_turn() {
    let mut transcript = TranscriptAggregator::new();
    transcript.append_output("Hel");
    transcript.append_output("lo");

    let entries = transcript.flush();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, LogSource::Agent);
    assert_eq!(entries[0].text, "Hello");
    assert_eq!(transcript.pending_output(), "");
}

#[test]
fn test_user_entry_precedes_agent_entry() {
    let mut transcript = TranscriptAggregator::new();
    transcript.append_output("Sure.");
    transcript.append_input("What time ");
    transcript.append_input("is it?");

    let entries = transcript.flush();
    let sources: Vec<LogSource> = entries.iter().map(|e| e.source).collect();
    assert_eq!(sources, vec![LogSource::User, LogSource::Agent]);
    assert_eq!(entries[0].text, "What time is it?");
}

#[test]
fn test_empty_turn_emits_nothing() {
    let mut transcript = TranscriptAggregator::new();
    assert!(transcript.flush().is_empty());

    transcript.append_input("");
    assert!(transcript.flush().is_empty());
}

#[test]
fn test_deltas_are_not_deduplicated() {
    let mut transcript = TranscriptAggregator::new();
    transcript.append_output("ha");
    transcript.append_output("ha");
    assert_eq!(transcript.flush()[0].text, "haha");
}

#[test]
fn test_discard_output_keeps_user_text() {
    let mut transcript = TranscriptAggregator::new();
    transcript.append_input("Stop");
    transcript.append_output("As I was say");
    transcript.discard_output();

    assert_eq!(transcript.pending_output(), "");
    let entries = transcript.flush();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].source, LogSource::User);
}

#[test]
fn test_flush_clears_for_the_next_turn() {
    let mut transcript = TranscriptAggregator::new();
    transcript.append_output("One");
    transcript.flush();
    transcript.append_output("Two");
    let entries = transcript.flush();
    assert_eq!(entries[0].text, "Two");
}

#[tokio::test]
async fn test_feed_is_append_only_and_broadcasts() {
    let feed = LogFeed::new();
    let mut rx = feed.subscribe();

    feed.push(LogEntry::system("Initializing audio..."));
    feed.push(LogEntry::new(LogSource::Agent, "Hi"));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.text, "Initializing audio...");
    assert_eq!(second.source, LogSource::Agent);

    let snapshot = feed.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_ne!(snapshot[0].id, snapshot[1].id);
    assert!(snapshot[0].timestamp <= snapshot[1].timestamp);
}

#[test]
fn test_log_entry_serializes_with_lowercase_source() {
    let entry = LogEntry::system("Connected!");
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["source"], "system");
    assert_eq!(json["text"], "Connected!");
}
