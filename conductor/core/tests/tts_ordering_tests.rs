//! Ordered delivery under concurrent synthesis
//!
//! Synthesis latency is randomized per sentence; payloads must still reach
//! the client in submission order, silent ones included.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rand::Rng;

use chorus_core::backend::TtsEngine;
use chorus_core::conversation::TtsTaskManager;
use chorus_core::output::{Actions, DisplayText};
use chorus_core::transport::{ChannelSink, MessageSink};

use common::{audio_texts, drain_now, ToneTts};

#[tokio::test]
async fn test_payloads_arrive_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let tts: Arc<dyn TtsEngine> = Arc::new(ToneTts::new(&dir, 25));
    let (sink, mut rx) = ChannelSink::pair(256);
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let manager = TtsTaskManager::new(20, 3);

    for round in 0..3 {
        let mut expected = Vec::new();
        let count = rand::thread_rng().gen_range(5..12);
        for i in 0..count {
            let text = format!("round {round} sentence {i}.");
            // Roughly one in four sentences has nothing to speak
            let tts_text = if rand::thread_rng().gen_bool(0.25) { "" } else { text.as_str() };
            manager
                .speak(tts_text, DisplayText::new(text.clone()), Actions::default(), &tts, &sink)
                .await;
            expected.push(text);
        }
        manager.drain().await;

        let received = drain_now(&mut rx);
        assert_eq!(audio_texts(&received), expected, "round {round}");
        manager.clear().await;
    }
}

#[tokio::test]
async fn test_synthesized_payloads_carry_audio_and_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let tts: Arc<dyn TtsEngine> = Arc::new(ToneTts::new(&dir, 0));
    let (sink, mut rx) = ChannelSink::pair(16);
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let manager = TtsTaskManager::new(20, 2);

    manager
        .speak("Hello.", DisplayText::new("Hello."), Actions::default(), &tts, &sink)
        .await;
    manager
        .speak("", DisplayText::new("(waves)"), Actions::default(), &tts, &sink)
        .await;
    assert_eq!(manager.synthesis_task_count().await, 1);
    manager.drain().await;

    let received = drain_now(&mut rx);
    assert_eq!(received.len(), 2);
    assert!(received[0]["audio"].is_string());
    assert!(!received[0]["volumes"].as_array().unwrap().is_empty());
    assert_eq!(received[0]["slice_length"], 20);
    assert!(received[1]["audio"].is_null());
    assert_eq!(received[1]["volumes"].as_array().unwrap().len(), 0);
    assert_eq!(manager.delivered_text().await, "Hello. (waves)");

    // Synthesis files are removed once delivered
    let leftover = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_cleared_manager_drops_pending_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let tts: Arc<dyn TtsEngine> = Arc::new(ToneTts::new(&dir, 200));
    let (sink, mut rx) = ChannelSink::pair(16);
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let manager = TtsTaskManager::new(20, 4);

    for text in ["one.", "two.", "three."] {
        manager
            .speak(text, DisplayText::new(text), Actions::default(), &tts, &sink)
            .await;
    }
    manager.clear().await;
    assert_eq!(manager.synthesis_task_count().await, 0);
    assert_eq!(manager.drain().await, 0);

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    assert!(audio_texts(&drain_now(&mut rx)).is_empty());
}
