//! Media-state admin-sync layer
//!
//! Camera and microphone control messages carry two independent pieces of
//! information: the action itself and a sync-mode header saying whether the
//! server forces the state ("1") or merely advises it ("0"). The header may
//! also be absent, which is a distinct case: resume/pause directives are then
//! dropped entirely instead of being published as advisory.

use tracing::debug;

use crate::bus::EventBus;
use crate::client::notify::{
    HEADER_CAM_RESOLUTION, HEADER_MAIN_CAM, HEADER_MIC, HEADER_SYNC_STATE, MAIN_CAM_ADMIN_START,
    MAIN_CAM_ADMIN_STOP, MAIN_CAM_MAX_RESOLUTION, MAIN_CAM_PAUSE, MAIN_CAM_RESUME,
    MIC_ADMIN_START, MIC_ADMIN_STOP, SYNC_STATE_ADVISORY, SYNC_STATE_FORCED,
};
use crate::error::{ClientError, ClientResult};
use crate::events::NotifyEvent;
use crate::transport::InfoMessage;

/// Which device a sync directive targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Camera,
    Microphone,
}

/// What the server wants done with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Start,
    Stop,
    Pause,
    Resume,
}

/// Sync-mode header tri-state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Forced,
    Advisory,
    Absent,
}

impl SyncMode {
    fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(SYNC_STATE_FORCED) => SyncMode::Forced,
            Some(SYNC_STATE_ADVISORY) => SyncMode::Advisory,
            Some(other) => {
                debug!(value = %other, "unknown sync-state value treated as advisory");
                SyncMode::Advisory
            }
            None => SyncMode::Absent,
        }
    }

    pub fn is_forced(self) -> bool {
        self == SyncMode::Forced
    }
}

/// One decoded camera/microphone control directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaSyncDirective {
    pub target: MediaKind,
    pub action: SyncAction,
    pub sync: SyncMode,
}

/// Decode a main-cam control message into the events to publish
pub fn decode_main_cam(info: &InfoMessage) -> ClientResult<Vec<NotifyEvent>> {
    let value = info.header(HEADER_MAIN_CAM).ok_or_else(|| ClientError::DecodeError {
        reason: format!("main-cam message without {HEADER_MAIN_CAM} header"),
    })?;
    let sync = SyncMode::from_header(info.header(HEADER_SYNC_STATE));

    let action = match value {
        MAIN_CAM_ADMIN_START => SyncAction::Start,
        MAIN_CAM_ADMIN_STOP => SyncAction::Stop,
        MAIN_CAM_RESUME => SyncAction::Resume,
        MAIN_CAM_PAUSE => SyncAction::Pause,
        MAIN_CAM_MAX_RESOLUTION => {
            let resolution =
                info.header(HEADER_CAM_RESOLUTION)
                    .ok_or_else(|| ClientError::DecodeError {
                        reason: format!(
                            "resolution cap without {HEADER_CAM_RESOLUTION} header"
                        ),
                    })?;
            return Ok(vec![NotifyEvent::MaxMainCamResolution {
                resolution: resolution.to_string(),
            }]);
        }
        other => {
            return Err(ClientError::DecodeError {
                reason: format!("unknown main-cam action {other:?}"),
            });
        }
    };

    Ok(directive_events(MediaSyncDirective {
        target: MediaKind::Camera,
        action,
        sync,
    }))
}

/// Decode a microphone control message into the events to publish
pub fn decode_mic(info: &InfoMessage) -> ClientResult<Vec<NotifyEvent>> {
    let value = info.header(HEADER_MIC).ok_or_else(|| ClientError::DecodeError {
        reason: format!("mic message without {HEADER_MIC} header"),
    })?;
    let sync = SyncMode::from_header(info.header(HEADER_SYNC_STATE));

    let action = match value {
        MIC_ADMIN_START => SyncAction::Start,
        MIC_ADMIN_STOP => SyncAction::Stop,
        other => {
            return Err(ClientError::DecodeError {
                reason: format!("unknown mic action {other:?}"),
            });
        }
    };

    Ok(directive_events(MediaSyncDirective {
        target: MediaKind::Microphone,
        action,
        sync,
    }))
}

/// Publication rules for one directive
///
/// Admin start/stop always publish their specific event. Resume/pause go to
/// the shared force-sync channel, and only when the sync header was present
/// at all; a bare resume/pause carries no usable state and is dropped.
fn directive_events(directive: MediaSyncDirective) -> Vec<NotifyEvent> {
    let is_sync_forced = directive.sync.is_forced();
    match (directive.target, directive.action) {
        (MediaKind::Camera, SyncAction::Start) => {
            vec![NotifyEvent::AdminStartMainCam { is_sync_forced }]
        }
        (MediaKind::Camera, SyncAction::Stop) => {
            vec![NotifyEvent::AdminStopMainCam { is_sync_forced }]
        }
        (MediaKind::Microphone, SyncAction::Start) => {
            vec![NotifyEvent::AdminStartMic { is_sync_forced }]
        }
        (MediaKind::Microphone, SyncAction::Stop) => {
            vec![NotifyEvent::AdminStopMic { is_sync_forced }]
        }
        (_, SyncAction::Resume) | (_, SyncAction::Pause) => {
            if directive.sync == SyncMode::Absent {
                debug!(?directive, "resume/pause without sync header, dropped");
                vec![]
            } else {
                vec![NotifyEvent::AdminForceSyncMediaState { is_sync_forced }]
            }
        }
    }
}

/// One-shot await over the shared force-sync channel
///
/// Resolves with the directive's forced flag the next time a resume/pause
/// with a sync header arrives.
pub async fn wait_sync_media_state(bus: &EventBus<NotifyEvent>) -> bool {
    bus.wait_map(|event| match event {
        NotifyEvent::AdminForceSyncMediaState { is_sync_forced } => Some(is_sync_forced),
        _ => None,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn main_cam(value: &str, sync: Option<&str>) -> InfoMessage {
        let mut headers = HashMap::new();
        headers.insert(HEADER_MAIN_CAM.to_string(), value.to_string());
        if let Some(sync) = sync {
            headers.insert(HEADER_SYNC_STATE.to_string(), sync.to_string());
        }
        InfoMessage {
            content_type: crate::client::notify::CONTENT_TYPE_MAIN_CAM.to_string(),
            headers,
        }
    }

    fn mic(value: &str, sync: Option<&str>) -> InfoMessage {
        let mut headers = HashMap::new();
        headers.insert(HEADER_MIC.to_string(), value.to_string());
        if let Some(sync) = sync {
            headers.insert(HEADER_SYNC_STATE.to_string(), sync.to_string());
        }
        InfoMessage {
            content_type: crate::client::notify::CONTENT_TYPE_MIC.to_string(),
            headers,
        }
    }

    #[test]
    fn admin_start_always_publishes_even_without_sync_header() {
        let events = decode_main_cam(&main_cam(MAIN_CAM_ADMIN_START, None)).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminStartMainCam { is_sync_forced: false }]
        );

        let events = decode_main_cam(&main_cam(MAIN_CAM_ADMIN_START, Some("1"))).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminStartMainCam { is_sync_forced: true }]
        );
    }

    #[test]
    fn admin_stop_mic_carries_sync_flag() {
        let events = decode_mic(&mic(MIC_ADMIN_STOP, Some("0"))).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminStopMic { is_sync_forced: false }]
        );
    }

    #[test]
    fn unknown_sync_value_is_treated_as_advisory() {
        let events = decode_mic(&mic(MIC_ADMIN_STOP, Some("maybe"))).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminStopMic { is_sync_forced: false }]
        );
    }

    #[test]
    fn resume_publishes_shared_event_only_with_sync_header() {
        let events = decode_main_cam(&main_cam(MAIN_CAM_RESUME, Some("1"))).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminForceSyncMediaState { is_sync_forced: true }]
        );

        let events = decode_main_cam(&main_cam(MAIN_CAM_RESUME, Some("0"))).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::AdminForceSyncMediaState { is_sync_forced: false }]
        );

        let events = decode_main_cam(&main_cam(MAIN_CAM_RESUME, None)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn pause_without_sync_header_is_dropped() {
        let events = decode_main_cam(&main_cam(MAIN_CAM_PAUSE, None)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn resolution_cap_requires_its_value_header() {
        let mut message = main_cam(MAIN_CAM_MAX_RESOLUTION, None);
        assert!(decode_main_cam(&message).is_err());

        message.headers.insert(
            HEADER_CAM_RESOLUTION.to_string(),
            "1280x720".to_string(),
        );
        let events = decode_main_cam(&message).unwrap();
        assert_eq!(
            events,
            vec![NotifyEvent::MaxMainCamResolution { resolution: "1280x720".into() }]
        );
    }

    #[test]
    fn unknown_actions_are_decode_errors() {
        assert!(decode_main_cam(&main_cam("EXPLODE", None)).is_err());
        assert!(decode_mic(&mic("EXPLODE", None)).is_err());
    }

    #[tokio::test]
    async fn wait_sync_media_state_resolves_with_forced_flag() {
        let bus = EventBus::new();
        let wait = wait_sync_media_state(&bus);
        tokio::pin!(wait);

        tokio::select! {
            biased;
            _ = &mut wait => panic!("resolved before any event"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(1)) => {}
        }

        bus.emit(NotifyEvent::AdminStartMainCam { is_sync_forced: true });
        bus.emit(NotifyEvent::AdminForceSyncMediaState { is_sync_forced: true });
        assert!(wait.await);
    }
}
