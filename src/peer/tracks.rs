//! Local media tracks and the coordinator that binds them to peer sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::connection::SenderId;
use super::registry::PeerRegistry;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackPurpose {
    Camera,
    Screen,
    Microphone,
}

impl TrackPurpose {
    pub fn kind(&self) -> MediaKind {
        match self {
            TrackPurpose::Camera | TrackPurpose::Screen => MediaKind::Video,
            TrackPurpose::Microphone => MediaKind::Audio,
        }
    }

    /// Camera and screen share compete for the single video slot
    pub fn slot(&self) -> TrackSlot {
        match self.kind() {
            MediaKind::Audio => TrackSlot::Audio,
            MediaKind::Video => TrackSlot::Video,
        }
    }
}

impl fmt::Display for TrackPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackPurpose::Camera => "camera",
            TrackPurpose::Screen => "screen",
            TrackPurpose::Microphone => "microphone",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSlot {
    Audio,
    Video,
}

/// A captured media track owned by the capture layer
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Release the capture device
    fn stop(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl MediaConstraints {
    pub fn for_purpose(purpose: TrackPurpose) -> Self {
        match purpose {
            TrackPurpose::Camera => Self {
                video: true,
                max_width: Some(1280),
                max_height: Some(720),
                frame_rate: Some(30),
                ..Self::default()
            },
            TrackPurpose::Screen => Self {
                video: true,
                frame_rate: Some(15),
                ..Self::default()
            },
            TrackPurpose::Microphone => Self {
                audio: true,
                ..Self::default()
            },
        }
    }
}

/// Capture capability: camera, display or microphone
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(
        &self,
        purpose: TrackPurpose,
        constraints: &MediaConstraints,
    ) -> Result<Arc<dyn MediaTrack>>;
}

/// A media track tagged with what it is used for
#[derive(Clone)]
pub struct LocalTrack {
    purpose: TrackPurpose,
    inner: Arc<dyn MediaTrack>,
}

impl LocalTrack {
    pub fn new(purpose: TrackPurpose, inner: Arc<dyn MediaTrack>) -> Result<Self> {
        if inner.kind() != purpose.kind() {
            return Err(Error::MediaTrackError(format!(
                "{} track {} has kind {:?}",
                purpose,
                inner.id(),
                inner.kind()
            )));
        }
        Ok(Self { purpose, inner })
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind()
    }

    pub fn purpose(&self) -> TrackPurpose {
        self.purpose
    }

    pub fn media(&self) -> &Arc<dyn MediaTrack> {
        &self.inner
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    pub fn stop(&self) {
        self.inner.stop();
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id())
            .field("purpose", &self.purpose)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// A local track attached to one session's connection
#[derive(Debug, Clone)]
pub struct TrackBinding {
    pub track: LocalTrack,
    pub sender: SenderId,
    pub target_bitrate_kbps: Option<u32>,
}

impl TrackBinding {
    pub fn kind(&self) -> MediaKind {
        self.track.kind()
    }

    pub fn purpose(&self) -> TrackPurpose {
        self.track.purpose()
    }
}

/// Owns the local track inventory and applies changes to every session.
///
/// Sessions created later pick up [`TrackCoordinator::local_tracks`].
#[derive(Debug, Default)]
pub struct TrackCoordinator {
    active: HashMap<TrackSlot, LocalTrack>,
    /// Camera displaced by a screen share, disabled until the share stops
    paused_camera: Option<LocalTrack>,
    bitrates: HashMap<TrackPurpose, u32>,
}

impl TrackCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bitrates(bitrates: impl IntoIterator<Item = (TrackPurpose, u32)>) -> Self {
        Self {
            bitrates: bitrates.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Tracks to attach to a newly created session, with their bitrate targets
    pub fn local_tracks(&self) -> Vec<(LocalTrack, Option<u32>)> {
        self.active
            .values()
            .map(|t| (t.clone(), self.bitrates.get(&t.purpose()).copied()))
            .collect()
    }

    pub fn active(&self, purpose: TrackPurpose) -> Option<&LocalTrack> {
        self.active
            .get(&purpose.slot())
            .filter(|t| t.purpose() == purpose)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.active(TrackPurpose::Screen).is_some()
    }

    /// Bind `track` on every session. An occupied slot has its track replaced
    /// in place; an empty slot gets a new binding and renegotiates.
    pub async fn attach_local_track(&mut self, registry: &mut PeerRegistry, track: LocalTrack) {
        let purpose = track.purpose();
        let bitrate = self.bitrates.get(&purpose).copied();
        registry.attach_track(&track, bitrate).await;

        let new_id = track.id().to_string();
        if let Some(previous) = self.active.insert(purpose.slot(), track) {
            let parked = self
                .paused_camera
                .as_ref()
                .is_some_and(|cam| cam.id() == previous.id());
            if !parked && previous.id() != new_id {
                previous.stop();
            }
        }
        info!("Attached local {} track", purpose);
    }

    /// Stop and unbind the track used for `purpose`. Returns `false` if none.
    ///
    /// Detaching a screen share that displaced the camera puts the camera back.
    pub async fn detach_local_track(
        &mut self,
        registry: &mut PeerRegistry,
        purpose: TrackPurpose,
    ) -> bool {
        match purpose {
            TrackPurpose::Camera if self.paused_camera.is_some() => {
                if let Some(cam) = self.paused_camera.take() {
                    cam.stop();
                }
                info!("Dropped paused camera");
                true
            }
            TrackPurpose::Screen if self.paused_camera.is_some() && self.is_screen_sharing() => {
                self.restore_camera(registry).await
            }
            _ => self.remove_active(registry, purpose).await,
        }
    }

    async fn remove_active(&mut self, registry: &mut PeerRegistry, purpose: TrackPurpose) -> bool {
        let Some(track) = self.active(purpose).cloned() else {
            return false;
        };
        self.active.remove(&purpose.slot());
        registry.detach_track(purpose).await;
        track.stop();
        info!("Detached local {} track", purpose);
        true
    }

    /// Put the paused camera back into the video slot by replacement
    async fn restore_camera(&mut self, registry: &mut PeerRegistry) -> bool {
        let Some(camera) = self.paused_camera.take() else {
            return false;
        };
        camera.set_enabled(true);
        // replaces the share in the video slot and stops it
        self.attach_local_track(registry, camera).await;
        true
    }

    /// Best effort; unsupported bitrate control is ignored
    pub async fn set_target_bitrate(
        &mut self,
        registry: &mut PeerRegistry,
        purpose: TrackPurpose,
        kbps: u32,
    ) {
        self.bitrates.insert(purpose, kbps);
        registry.set_target_bitrate(purpose, kbps).await;
    }

    /// Mute or unmute the microphone without renegotiating.
    /// Returns `false` if there is no microphone track.
    pub fn set_microphone_muted(&self, muted: bool) -> bool {
        match self.active(TrackPurpose::Microphone) {
            Some(mic) => {
                mic.set_enabled(!muted);
                debug!("Microphone muted: {}", muted);
                true
            }
            None => false,
        }
    }

    pub async fn start_camera(
        &mut self,
        registry: &mut PeerRegistry,
        source: &dyn MediaSource,
    ) -> Result<()> {
        let camera = acquire(source, TrackPurpose::Camera).await?;
        if self.is_screen_sharing() {
            // the share keeps the slot; the camera comes back when it stops
            camera.set_enabled(false);
            if let Some(old) = self.paused_camera.replace(camera) {
                old.stop();
            }
            return Ok(());
        }
        self.attach_local_track(registry, camera).await;
        Ok(())
    }

    pub async fn start_microphone(
        &mut self,
        registry: &mut PeerRegistry,
        source: &dyn MediaSource,
    ) -> Result<()> {
        let mic = acquire(source, TrackPurpose::Microphone).await?;
        self.attach_local_track(registry, mic).await;
        Ok(())
    }

    /// Take over the video slot with a display capture, pausing the camera
    pub async fn start_screen_share(
        &mut self,
        registry: &mut PeerRegistry,
        source: &dyn MediaSource,
    ) -> Result<()> {
        let screen = acquire(source, TrackPurpose::Screen).await?;
        if let Some(camera) = self.active(TrackPurpose::Camera).cloned() {
            camera.set_enabled(false);
            self.paused_camera = Some(camera);
        }
        self.attach_local_track(registry, screen).await;
        Ok(())
    }

    /// Returns `false` if no screen share was running
    pub async fn stop_screen_share(&mut self, registry: &mut PeerRegistry) -> bool {
        if !self.is_screen_sharing() {
            return false;
        }
        if !self.restore_camera(registry).await {
            self.remove_active(registry, TrackPurpose::Screen).await;
        }
        info!("Screen share stopped");
        true
    }

    /// A track was ended outside our control, e.g. the platform's
    /// "stop sharing" button
    pub async fn track_ended(&mut self, registry: &mut PeerRegistry, track_id: &str) -> bool {
        if self.paused_camera.as_ref().is_some_and(|cam| cam.id() == track_id) {
            // nothing to restore once the share stops
            if let Some(cam) = self.paused_camera.take() {
                cam.stop();
            }
            info!("Paused camera ended");
            return true;
        }
        let Some(purpose) = self
            .active
            .values()
            .find(|t| t.id() == track_id)
            .map(|t| t.purpose())
        else {
            return false;
        };
        if purpose == TrackPurpose::Screen {
            self.stop_screen_share(registry).await
        } else {
            self.detach_local_track(registry, purpose).await
        }
    }
}

async fn acquire(source: &dyn MediaSource, purpose: TrackPurpose) -> Result<LocalTrack> {
    let constraints = MediaConstraints::for_purpose(purpose);
    let media = source
        .acquire(purpose, &constraints)
        .await
        .map_err(|e| match e {
            Error::MediaAcquisition(_) => e,
            other => Error::MediaAcquisition(format!("{}: {}", purpose, other)),
        })?;
    LocalTrack::new(purpose, media).map_err(|e| Error::MediaAcquisition(e.to_string()))
}
