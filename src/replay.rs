//! Scripted page activity for exercising a tracker against a live backend.

use std::{env, fs, path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{self, Instant};

use crate::activity::InputKind;
use crate::config::TrackerConfig;
use crate::host::{HeadlessHost, ScrollMetrics};
use crate::lifecycle::{PageEvent, Visibility};
use crate::models::{DeviceContext, InteractionEvent, InteractionType};
use crate::tracker::BehaviorTracker;
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReplayAction {
    #[serde(rename_all = "camelCase")]
    StartImpression { content_id: String },
    #[serde(rename_all = "camelCase")]
    EndImpression { content_id: String },
    Input { kind: InputKind },
    Scroll(ScrollMetrics),
    Visibility { state: Visibility },
    #[serde(rename_all = "camelCase")]
    Interaction {
        content_id: String,
        interaction: InteractionType,
        #[serde(default)]
        metadata: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    RecommendationClick {
        recommendation_id: String,
        content_id: String,
    },
    #[serde(rename_all = "camelCase")]
    SetUser { user_id: Option<String> },
    Unload,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStep {
    /// Offset from the start of the replay.
    pub at_ms: u64,
    pub action: ReplayAction,
}

pub fn load_script(path: &Path) -> Result<Vec<ReplayStep>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay script {}", path.display()))?;
    parse_script(&contents).with_context(|| format!("Invalid replay script {}", path.display()))
}

pub fn parse_script(contents: &str) -> Result<Vec<ReplayStep>> {
    let mut steps: Vec<ReplayStep> = serde_json::from_str(contents)?;
    steps.sort_by_key(|step| step.at_ms);
    Ok(steps)
}

/// Plays `steps` in real (tokio) time. Input, visibility and unload go
/// through the tracker's page event channel like a host would send them.
pub async fn play(tracker: &BehaviorTracker, host: &HeadlessHost, steps: &[ReplayStep]) {
    let started = Instant::now();
    let events = tracker.page_events();

    for step in steps {
        time::sleep_until(started + Duration::from_millis(step.at_ms)).await;

        match &step.action {
            ReplayAction::StartImpression { content_id } => {
                if !tracker.start_impression(content_id).await {
                    log_warn!("{content_id} is already being tracked");
                }
            }
            ReplayAction::EndImpression { content_id } => {
                match tracker.end_impression(content_id).await {
                    Some(metrics) => log_info!(
                        "{content_id}: active {}ms, depth {}%, complete {:?}",
                        metrics.active_time_ms,
                        metrics.scroll_depth_pct,
                        metrics.reading_complete
                    ),
                    None => log_warn!("{content_id} was not being tracked"),
                }
            }
            ReplayAction::Input { kind } => send(&events, PageEvent::Input(*kind)),
            ReplayAction::Scroll(metrics) => host.set_scroll(*metrics),
            ReplayAction::Visibility { state } => send(&events, PageEvent::Visibility(*state)),
            ReplayAction::Interaction {
                content_id,
                interaction,
                metadata,
            } => {
                let mut event = InteractionEvent::new(content_id.clone(), *interaction);
                if let Some(metadata) = metadata {
                    event = event.with_metadata(metadata.clone());
                }
                tracker.track_interaction(event);
            }
            ReplayAction::RecommendationClick {
                recommendation_id,
                content_id,
            } => {
                tracker.track_recommendation_click(recommendation_id, content_id);
            }
            ReplayAction::SetUser { user_id } => tracker.set_user_id(user_id.clone()),
            ReplayAction::Unload => send(&events, PageEvent::Unload),
        }
    }
}

fn send(events: &crate::lifecycle::PageEventSender, event: PageEvent) {
    if events.send(event).is_err() {
        log_warn!("Dropped {event:?}: lifecycle listeners already detached");
    }
}

pub(crate) async fn run_from_args() -> Result<()> {
    let Some(script_path) = env::args().nth(1) else {
        bail!("usage: telemetry-replay <script.json>");
    };
    let steps = load_script(Path::new(&script_path))?;
    let config = TrackerConfig::from_env()?;

    log_info!(
        "Replaying {} step(s) against {}",
        steps.len(),
        config.endpoint_url()
    );

    let host = Arc::new(HeadlessHost::new(DeviceContext::detect()));
    let tracker = BehaviorTracker::connect(config, host.clone()).await?;
    play(&tracker, &host, &steps).await;
    tracker.teardown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::{Call, RecordingTransport};

    const SCRIPT: &str = r#"[
        { "atMs": 0, "action": { "type": "startImpression", "contentId": "a-1" } },
        { "atMs": 500, "action": { "type": "scroll", "scrollTop": 3000, "viewportHeight": 800, "documentHeight": 4000 } },
        { "atMs": 4000, "action": { "type": "visibility", "state": "hidden" } },
        { "atMs": 6000, "action": { "type": "visibility", "state": "visible" } },
        { "atMs": 7000, "action": { "type": "input", "kind": "keyboard" } },
        { "atMs": 7500, "action": { "type": "interaction", "contentId": "a-1", "interaction": "like" } },
        { "atMs": 9000, "action": { "type": "endImpression", "contentId": "a-1" } },
        { "atMs": 9500, "action": { "type": "unload" } }
    ]"#;

    #[test]
    fn steps_are_sorted_by_offset() {
        let steps = parse_script(
            r#"[
                { "atMs": 900, "action": { "type": "unload" } },
                { "atMs": 100, "action": { "type": "setUser", "userId": "u-1" } }
            ]"#,
        )
        .unwrap();

        assert_eq!(steps[0].at_ms, 100);
        assert_eq!(
            steps[0].action,
            ReplayAction::SetUser {
                user_id: Some("u-1".into())
            }
        );
        assert_eq!(steps[1].action, ReplayAction::Unload);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(parse_script(r#"[{ "atMs": 0, "action": { "type": "teleport" } }]"#).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn scripted_visit_reaches_the_backend() {
        let transport = Arc::new(RecordingTransport::new());
        let host = Arc::new(HeadlessHost::new(DeviceContext::detect()));
        let tracker =
            BehaviorTracker::init(TrackerConfig::default(), host.clone(), transport.clone()).await;

        play(&tracker, &host, &parse_script(SCRIPT).unwrap()).await;
        tracker.teardown().await;

        let calls = transport.calls();
        assert!(matches!(calls.first(), Some(Call::CreateSession(_))));
        assert!(matches!(calls.last(), Some(Call::EndSession(_))));
        assert_eq!(transport.count(|call| matches!(call, Call::TrackInteraction(_))), 1);

        let updates = transport.updates();
        // One checkpoint when hidden, one final update.
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].active_time, 4);
        let last = &updates[1];
        assert_eq!(last.end, Some(true));
        assert_eq!(last.scroll_depth, 95);
        assert_eq!(last.reading_complete, Some(true));
        // 4s before hiding plus 3s after showing.
        assert_eq!(last.active_time, 7);
    }
}
