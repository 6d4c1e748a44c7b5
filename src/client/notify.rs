//! Notification decoder and wire constants
//!
//! Two inbound surfaces converge here: the generic notify envelope (a JSON
//! value carried in a SIP header) and typed INFO messages dispatched by
//! content type. Both decode into domain events at this boundary; malformed
//! input is logged and dropped, never propagated to subscribers.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::client::media_sync;
use crate::error::{ClientError, ClientResult};
use crate::events::{CallEvent, LicenseType, NotifyEvent, ParticipantRole};
use crate::transport::InfoMessage;

// Notify envelope.
pub const NOTIFY_HEADER: &str = "X-Conf-Notify";

pub const CMD_CHANNELS: &str = "channels";
pub const CMD_WEBCAST_STARTED: &str = "WebcastStarted";
pub const CMD_WEBCAST_STOPPED: &str = "WebcastStopped";
pub const CMD_MODERATOR_ADDED: &str = "addedToListModerators";
pub const CMD_MODERATOR_REMOVED: &str = "removedFromListModerators";
pub const CMD_WORD_REQUEST_ACCEPTED: &str = "acceptedWordRequest";
pub const CMD_WORD_REQUEST_REJECTED: &str = "rejectedWordRequest";
pub const CMD_MOVE_REQUEST_TO_STREAM: &str = "moveRequestToStream";
pub const CMD_ACCOUNT_CHANGED: &str = "accountChanged";
pub const CMD_ACCOUNT_DELETED: &str = "accountDeleted";
pub const CMD_PARTICIPANT_TOKEN_ISSUED: &str = "ParticipantTokenIssued";

// Typed INFO content types.
pub const CONTENT_TYPE_ENTER_ROOM: &str = "application/conf.enter-room";
pub const CONTENT_TYPE_SHARE_STATE: &str = "application/conf.share-state";
pub const CONTENT_TYPE_MAIN_CAM: &str = "application/conf.main-cam";
pub const CONTENT_TYPE_MIC: &str = "application/conf.mic";
pub const CONTENT_TYPE_USE_LICENSE: &str = "application/conf.use-license";
pub const CONTENT_TYPE_PARTICIPANT_STATE: &str = "application/conf.participant-state";

// Single-value headers.
pub const HEADER_ROOM: &str = "X-Conf-Room";
pub const HEADER_CHANNELS_AUDIO: &str = "X-Conf-Channels-Audio";
pub const HEADER_CHANNELS_VIDEO: &str = "X-Conf-Channels-Video";
pub const HEADER_SHARE_STATE: &str = "X-Conf-Share-State";
pub const HEADER_MAIN_CAM: &str = "X-Conf-Main-Cam";
pub const HEADER_MIC: &str = "X-Conf-Mic";
pub const HEADER_SYNC_STATE: &str = "X-Conf-Sync-State";
pub const HEADER_CAM_RESOLUTION: &str = "X-Conf-Cam-Resolution";
pub const HEADER_USE_LICENSE: &str = "X-Conf-Use-License";
pub const HEADER_PARTICIPANT_STATE: &str = "X-Conf-Participant-State";

// Share-state actions, inbound and outbound.
pub const SHARE_STATE_CAN_RECEIVE_CONTENT: &str = "YOUCANRECEIVECONTENT";
pub const SHARE_STATE_CONTENT_END: &str = "CONTENTEND";
pub const SHARE_STATE_MUST_STOP_PRESENTATION: &str = "MUSTSTOPPRESENTATION";
pub const SHARE_STATE_LET_ME_START: &str = "LETMESTARTPRESENTATION";
pub const SHARE_STATE_STOP: &str = "STOPPRESENTATION";

// Camera / microphone control actions.
pub const MAIN_CAM_ADMIN_START: &str = "ADMINSTARTMAINCAM";
pub const MAIN_CAM_ADMIN_STOP: &str = "ADMINSTOPMAINCAM";
pub const MAIN_CAM_RESUME: &str = "RESUMEMAINCAM";
pub const MAIN_CAM_PAUSE: &str = "PAUSEMAINCAM";
pub const MAIN_CAM_MAX_RESOLUTION: &str = "MAXMAINCAMRESOLUTION";
pub const MIC_ADMIN_START: &str = "ADMINSTARTMIC";
pub const MIC_ADMIN_STOP: &str = "ADMINSTOPMIC";
pub const SYNC_STATE_FORCED: &str = "1";
pub const SYNC_STATE_ADVISORY: &str = "0";

// License grades and participant roles.
pub const LICENSE_AUDIO: &str = "AUDIO";
pub const LICENSE_VIDEO: &str = "VIDEO";
pub const LICENSE_AUDIO_PLUS_PRESENTATION: &str = "AUDIOPLUSPRESENTATION";
pub const PARTICIPANT_STATE_SPECTATOR: &str = "SPECTATOR";
pub const PARTICIPANT_STATE_PARTICIPANT: &str = "PARTICIPANT";

/// Closed vocabulary of notify envelope commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyCommand {
    Channels { audio: String, video: String },
    WebcastStarted { conference: String },
    WebcastStopped { conference: String },
    ModeratorAdded { conference: String },
    ModeratorRemoved { conference: String },
    WordRequestAccepted { conference: String },
    WordRequestRejected { conference: String },
    MoveRequestToStream { conference: String },
    AccountChanged,
    AccountDeleted,
    ParticipantTokenIssued {
        conference: String,
        participant: String,
        jwt: String,
    },
    /// Not part of the closed vocabulary; logged and dropped
    Unrecognized { cmd: String },
}

#[derive(Debug, Deserialize)]
struct NotifyEnvelope {
    cmd: String,
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    video: Option<String>,
    #[serde(default)]
    conference: Option<String>,
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    jwt: Option<String>,
}

impl NotifyEnvelope {
    fn require(field: Option<String>, cmd: &str, name: &str) -> ClientResult<String> {
        field.ok_or_else(|| ClientError::DecodeError {
            reason: format!("notify {cmd:?} missing field {name:?}"),
        })
    }
}

/// Decode one notify envelope into a command
///
/// Fields may ride at the top level next to `cmd` or inside a nested `body`
/// object; both forms appear on the wire and decode identically.
pub fn decode_notify(header: &str) -> ClientResult<NotifyCommand> {
    let mut value: serde_json::Value =
        serde_json::from_str(header).map_err(|e| ClientError::DecodeError {
            reason: format!("malformed notify envelope: {e}"),
        })?;

    if let Some(serde_json::Value::Object(body)) = value.get("body").cloned() {
        if let Some(map) = value.as_object_mut() {
            map.remove("body");
            // Top-level fields win over body duplicates.
            for (key, field) in body {
                map.entry(key).or_insert(field);
            }
        }
    }

    let envelope: NotifyEnvelope =
        serde_json::from_value(value).map_err(|e| ClientError::DecodeError {
            reason: format!("malformed notify envelope: {e}"),
        })?;

    let cmd = envelope.cmd.clone();
    let command = match cmd.as_str() {
        CMD_CHANNELS => NotifyCommand::Channels {
            audio: NotifyEnvelope::require(envelope.audio, &cmd, "audio")?,
            video: NotifyEnvelope::require(envelope.video, &cmd, "video")?,
        },
        CMD_WEBCAST_STARTED => NotifyCommand::WebcastStarted {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_WEBCAST_STOPPED => NotifyCommand::WebcastStopped {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_MODERATOR_ADDED => NotifyCommand::ModeratorAdded {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_MODERATOR_REMOVED => NotifyCommand::ModeratorRemoved {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_WORD_REQUEST_ACCEPTED => NotifyCommand::WordRequestAccepted {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_WORD_REQUEST_REJECTED => NotifyCommand::WordRequestRejected {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_MOVE_REQUEST_TO_STREAM => NotifyCommand::MoveRequestToStream {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
        },
        CMD_ACCOUNT_CHANGED => NotifyCommand::AccountChanged,
        CMD_ACCOUNT_DELETED => NotifyCommand::AccountDeleted,
        CMD_PARTICIPANT_TOKEN_ISSUED => NotifyCommand::ParticipantTokenIssued {
            conference: NotifyEnvelope::require(envelope.conference, &cmd, "conference")?,
            participant: NotifyEnvelope::require(envelope.participant, &cmd, "participant")?,
            jwt: NotifyEnvelope::require(envelope.jwt, &cmd, "jwt")?,
        },
        _ => NotifyCommand::Unrecognized { cmd },
    };
    Ok(command)
}

/// Decodes inbound notifications onto the notify and call buses
pub struct NotificationDecoder {
    notify_bus: Arc<EventBus<NotifyEvent>>,
    call_bus: Arc<EventBus<CallEvent>>,
}

impl NotificationDecoder {
    pub fn new(
        notify_bus: Arc<EventBus<NotifyEvent>>,
        call_bus: Arc<EventBus<CallEvent>>,
    ) -> Self {
        Self { notify_bus, call_bus }
    }

    /// Handle one notify envelope header
    pub fn handle_notify(&self, header: &str) {
        let command = match decode_notify(header) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "dropping malformed notify envelope");
                return;
            }
        };

        let event = match command {
            NotifyCommand::Channels { audio, video } => NotifyEvent::Channels { audio, video },
            NotifyCommand::WebcastStarted { conference } => {
                NotifyEvent::WebcastStarted { conference }
            }
            NotifyCommand::WebcastStopped { conference } => {
                NotifyEvent::WebcastStopped { conference }
            }
            NotifyCommand::ModeratorAdded { conference } => {
                NotifyEvent::ModeratorAdded { conference }
            }
            NotifyCommand::ModeratorRemoved { conference } => {
                NotifyEvent::ModeratorRemoved { conference }
            }
            NotifyCommand::WordRequestAccepted { conference } => {
                NotifyEvent::WordRequestAccepted { conference }
            }
            NotifyCommand::WordRequestRejected { conference } => {
                NotifyEvent::WordRequestRejected { conference }
            }
            NotifyCommand::MoveRequestToStream { conference } => {
                NotifyEvent::ParticipantMovedToWebcast { conference }
            }
            NotifyCommand::AccountChanged => NotifyEvent::AccountChanged,
            NotifyCommand::AccountDeleted => NotifyEvent::AccountDeleted,
            NotifyCommand::ParticipantTokenIssued {
                conference,
                participant,
                jwt,
            } => NotifyEvent::ParticipantTokenIssued {
                conference,
                participant,
                jwt,
            },
            NotifyCommand::Unrecognized { cmd } => {
                debug!(%cmd, "dropping unrecognized notify command");
                return;
            }
        };
        self.notify_bus.emit(event);
    }

    /// Handle one typed INFO message
    pub fn handle_info(&self, info: &InfoMessage) {
        let result = match info.content_type.as_str() {
            CONTENT_TYPE_ENTER_ROOM => self.handle_enter_room(info),
            CONTENT_TYPE_SHARE_STATE => self.handle_share_state(info),
            CONTENT_TYPE_MAIN_CAM => self.emit_all(media_sync::decode_main_cam(info)),
            CONTENT_TYPE_MIC => self.emit_all(media_sync::decode_mic(info)),
            CONTENT_TYPE_USE_LICENSE => self.handle_use_license(info),
            CONTENT_TYPE_PARTICIPANT_STATE => self.handle_participant_state(info),
            other => {
                debug!(content_type = %other, "dropping info with unknown content type");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(content_type = %info.content_type, error = %e, "dropping malformed info");
        }
    }

    fn emit_all(&self, events: ClientResult<Vec<NotifyEvent>>) -> ClientResult<()> {
        for event in events? {
            self.notify_bus.emit(event);
        }
        Ok(())
    }

    fn handle_enter_room(&self, info: &InfoMessage) -> ClientResult<()> {
        let room = info.header(HEADER_ROOM).ok_or_else(|| ClientError::DecodeError {
            reason: format!("enter-room without {HEADER_ROOM} header"),
        })?;
        self.notify_bus.emit(NotifyEvent::EnterRoom {
            room: room.to_string(),
        });

        // Channel assignment may ride along on the same message.
        if let (Some(audio), Some(video)) = (
            info.header(HEADER_CHANNELS_AUDIO),
            info.header(HEADER_CHANNELS_VIDEO),
        ) {
            self.notify_bus.emit(NotifyEvent::Channels {
                audio: audio.to_string(),
                video: video.to_string(),
            });
        }
        Ok(())
    }

    fn handle_share_state(&self, info: &InfoMessage) -> ClientResult<()> {
        let action = info
            .header(HEADER_SHARE_STATE)
            .ok_or_else(|| ClientError::DecodeError {
                reason: format!("share-state without {HEADER_SHARE_STATE} header"),
            })?;
        match action {
            SHARE_STATE_CAN_RECEIVE_CONTENT => {
                self.call_bus.emit(CallEvent::AvailableSecondRemoteStream);
            }
            SHARE_STATE_CONTENT_END => {
                self.call_bus.emit(CallEvent::NotAvailableSecondRemoteStream);
            }
            SHARE_STATE_MUST_STOP_PRESENTATION => {
                self.call_bus.emit(CallEvent::MustStopPresentation);
            }
            other => {
                return Err(ClientError::DecodeError {
                    reason: format!("unknown share-state action {other:?}"),
                });
            }
        }
        Ok(())
    }

    fn handle_use_license(&self, info: &InfoMessage) -> ClientResult<()> {
        let value = info
            .header(HEADER_USE_LICENSE)
            .ok_or_else(|| ClientError::DecodeError {
                reason: format!("use-license without {HEADER_USE_LICENSE} header"),
            })?;
        let license = match value {
            LICENSE_AUDIO => LicenseType::Audio,
            LICENSE_VIDEO => LicenseType::Video,
            LICENSE_AUDIO_PLUS_PRESENTATION => LicenseType::AudioPlusPresentation,
            other => {
                return Err(ClientError::DecodeError {
                    reason: format!("unknown license grade {other:?}"),
                });
            }
        };
        self.notify_bus.emit(NotifyEvent::UseLicense { license });
        Ok(())
    }

    fn handle_participant_state(&self, info: &InfoMessage) -> ClientResult<()> {
        let value = info
            .header(HEADER_PARTICIPANT_STATE)
            .ok_or_else(|| ClientError::DecodeError {
                reason: format!("participant-state without {HEADER_PARTICIPANT_STATE} header"),
            })?;
        let role = match value {
            PARTICIPANT_STATE_SPECTATOR => ParticipantRole::Spectator,
            PARTICIPANT_STATE_PARTICIPANT => ParticipantRole::Participant,
            other => {
                return Err(ClientError::DecodeError {
                    reason: format!("unknown participant state {other:?}"),
                });
            }
        };
        self.notify_bus.emit(NotifyEvent::ParticipantMoved { role });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn decoder() -> (
        NotificationDecoder,
        tokio::sync::broadcast::Receiver<NotifyEvent>,
        tokio::sync::broadcast::Receiver<CallEvent>,
    ) {
        let notify_bus = Arc::new(EventBus::new());
        let call_bus = Arc::new(EventBus::new());
        let notify_rx = notify_bus.subscribe();
        let call_rx = call_bus.subscribe();
        (
            NotificationDecoder::new(notify_bus, call_bus),
            notify_rx,
            call_rx,
        )
    }

    fn info(content_type: &str, headers: &[(&str, &str)]) -> InfoMessage {
        InfoMessage {
            content_type: content_type.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn decodes_channels_command() {
        let command =
            decode_notify(r#"{"cmd":"channels","audio":"a-7","video":"v-3"}"#).unwrap();
        assert_eq!(
            command,
            NotifyCommand::Channels {
                audio: "a-7".into(),
                video: "v-3".into(),
            }
        );
    }

    #[test]
    fn decodes_participant_token() {
        let command = decode_notify(
            r#"{"cmd":"ParticipantTokenIssued","conference":"c1","participant":"p1","jwt":"t"}"#,
        )
        .unwrap();
        assert!(matches!(
            command,
            NotifyCommand::ParticipantTokenIssued { .. }
        ));
    }

    #[test]
    fn body_form_envelope_decodes_like_the_flat_form() {
        let command =
            decode_notify(r#"{"cmd":"WebcastStarted","body":{"conference":"c1"}}"#).unwrap();
        assert_eq!(
            command,
            NotifyCommand::WebcastStarted { conference: "c1".into() }
        );

        let command =
            decode_notify(r#"{"cmd":"channels","body":{"audio":"a-7","video":"v-3"}}"#).unwrap();
        assert_eq!(
            command,
            NotifyCommand::Channels {
                audio: "a-7".into(),
                video: "v-3".into(),
            }
        );

        // A body without the required fields is still a decode error.
        assert!(decode_notify(r#"{"cmd":"channels","body":{"audio":"a-7"}}"#).is_err());
    }

    #[test]
    fn unknown_cmd_is_unrecognized_not_an_error() {
        let command = decode_notify(r#"{"cmd":"fireTheLasers"}"#).unwrap();
        assert_eq!(
            command,
            NotifyCommand::Unrecognized { cmd: "fireTheLasers".into() }
        );
    }

    #[test]
    fn missing_fields_are_decode_errors() {
        assert!(decode_notify(r#"{"cmd":"channels","audio":"a-7"}"#).is_err());
        assert!(decode_notify(r#"{"cmd":"WebcastStarted"}"#).is_err());
        assert!(decode_notify("not json at all").is_err());
    }

    #[tokio::test]
    async fn malformed_envelope_is_dropped_silently() {
        let (decoder, mut notify_rx, _call_rx) = decoder();
        decoder.handle_notify("{broken");
        decoder.handle_notify(r#"{"cmd":"accountDeleted"}"#);
        assert_eq!(notify_rx.recv().await.unwrap(), NotifyEvent::AccountDeleted);
    }

    #[tokio::test]
    async fn enter_room_extracts_sibling_channel_headers() {
        let (decoder, mut notify_rx, _call_rx) = decoder();
        decoder.handle_info(&info(
            CONTENT_TYPE_ENTER_ROOM,
            &[
                (HEADER_ROOM, "room-1"),
                (HEADER_CHANNELS_AUDIO, "a-1"),
                (HEADER_CHANNELS_VIDEO, "v-1"),
            ],
        ));
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            NotifyEvent::EnterRoom { room: "room-1".into() }
        );
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            NotifyEvent::Channels { audio: "a-1".into(), video: "v-1".into() }
        );
    }

    #[tokio::test]
    async fn share_state_actions_target_the_call_bus() {
        let (decoder, _notify_rx, mut call_rx) = decoder();
        decoder.handle_info(&info(
            CONTENT_TYPE_SHARE_STATE,
            &[(HEADER_SHARE_STATE, SHARE_STATE_CAN_RECEIVE_CONTENT)],
        ));
        decoder.handle_info(&info(
            CONTENT_TYPE_SHARE_STATE,
            &[(HEADER_SHARE_STATE, SHARE_STATE_MUST_STOP_PRESENTATION)],
        ));
        assert_eq!(
            call_rx.recv().await.unwrap(),
            CallEvent::AvailableSecondRemoteStream
        );
        assert_eq!(
            call_rx.recv().await.unwrap(),
            CallEvent::MustStopPresentation
        );
    }

    #[tokio::test]
    async fn license_and_participant_state_decode() {
        let (decoder, mut notify_rx, _call_rx) = decoder();
        decoder.handle_info(&info(
            CONTENT_TYPE_USE_LICENSE,
            &[(HEADER_USE_LICENSE, LICENSE_AUDIO_PLUS_PRESENTATION)],
        ));
        decoder.handle_info(&info(
            CONTENT_TYPE_PARTICIPANT_STATE,
            &[(HEADER_PARTICIPANT_STATE, PARTICIPANT_STATE_SPECTATOR)],
        ));
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            NotifyEvent::UseLicense { license: LicenseType::AudioPlusPresentation }
        );
        assert_eq!(
            notify_rx.recv().await.unwrap(),
            NotifyEvent::ParticipantMoved { role: ParticipantRole::Spectator }
        );
    }
}
