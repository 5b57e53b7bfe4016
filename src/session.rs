//! One playback lifecycle for a chosen video.
//!
//! ```text
//! Idle -> Starting -> Playing <-> Paused -> Terminated
//! ```
//!
//! Starting reads the saved offset and seeks to it; pausing and terminating
//! write the current offset back. The host's lifecycle hooks (backgrounded,
//! foregrounded, navigated away) map onto [`PlaybackSession::pause`],
//! [`PlaybackSession::resume`] and [`PlaybackSession::terminate`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::media::library::VideoIdentity;
use crate::store::PositionStore;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("cannot create player: {0}")]
    Create(String),
    #[error("cannot bind media source: {0}")]
    Bind(String),
    #[error("player control failed: {0}")]
    Control(String),
}

/// The platform player. The session drives it; decoding is its business.
pub trait Player: Send {
    fn bind_source(&mut self, identity: &VideoIdentity) -> Result<(), PlayerError>;
    fn seek(&mut self, offset_ms: u64) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    /// Current playback offset in milliseconds.
    fn current_offset(&self) -> u64;
    /// Free the underlying resource. Called exactly once per player.
    fn release(&mut self);
}

pub trait PlayerFactory {
    type Player: Player;

    fn create(&self) -> Result<Self::Player, PlayerError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Playing,
    Paused,
    Terminated,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a playback session for {0} is already active")]
    AlreadyActive(String),
    #[error("cannot {action} a session that is {from:?}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },
    #[error(transparent)]
    Player(#[from] PlayerError),
}

/// Keys of videos with a live session. At most one session per video.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn claim(&self, key: &str) -> Option<Claim> {
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        inserted.then(|| Claim {
            registry: self.clone(),
            key: key.to_string(),
        })
    }
}

/// Registry slot, released on drop.
#[derive(Debug)]
struct Claim {
    registry: SessionRegistry,
    key: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Playback of one video, owning one player exclusively.
///
/// Dropping a session that is still playing or paused terminates it, so the
/// final offset is saved even when the host just lets it go.
pub struct PlaybackSession<P: Player> {
    identity: VideoIdentity,
    store: PositionStore,
    registry: SessionRegistry,
    state: SessionState,
    player: Option<P>,
    claim: Option<Claim>,
    resume_offset: u64,
    last_offset: u64,
}

impl<P: Player> PlaybackSession<P> {
    pub fn new(identity: VideoIdentity, store: PositionStore, registry: SessionRegistry) -> Self {
        Self {
            identity,
            store,
            registry,
            state: SessionState::Idle,
            player: None,
            claim: None,
            resume_offset: 0,
            last_offset: 0,
        }
    }

    pub fn identity(&self) -> &VideoIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Offset read from the store when the session started.
    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    /// Live player offset, or the last one recorded once the player is gone.
    pub fn current_offset(&self) -> u64 {
        self.player
            .as_ref()
            .map(Player::current_offset)
            .unwrap_or(self.last_offset)
    }

    /// Idle -> Starting -> Playing. Returns the offset playback resumed from.
    ///
    /// Fails if another session for the same video is alive or if the player
    /// cannot be set up; the session is then back in Idle.
    pub fn start<F>(&mut self, factory: &F) -> Result<u64, SessionError>
    where
        F: PlayerFactory<Player = P>,
    {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        let key = self.identity.key().to_string();
        let claim = self
            .registry
            .claim(&key)
            .ok_or_else(|| SessionError::AlreadyActive(key.clone()))?;

        self.state = SessionState::Starting;
        self.resume_offset = self.store.get(&key);
        self.last_offset = self.resume_offset;

        match self.open_player(factory) {
            Ok(player) => {
                self.player = Some(player);
                self.claim = Some(claim);
                self.state = SessionState::Playing;
                tracing::info!(
                    "Playing {} from {} ms",
                    self.identity.name(),
                    self.resume_offset
                );
                Ok(self.resume_offset)
            }
            Err(e) => {
                tracing::warn!("Cannot start playback of {}: {}", key, e);
                self.state = SessionState::Idle;
                Err(e.into())
            }
        }
    }

    fn open_player<F>(&self, factory: &F) -> Result<P, PlayerError>
    where
        F: PlayerFactory<Player = P>,
    {
        let mut player = factory.create()?;
        let prepared = player.bind_source(&self.identity).and_then(|()| {
            // 0 means nothing saved: start where the player starts
            if self.resume_offset > 0 {
                player.seek(self.resume_offset)?;
            }
            player.play()
        });
        if let Err(e) = prepared {
            player.release();
            return Err(e);
        }
        Ok(player)
    }

    /// Playing -> Paused. The offset is saved before the player is paused, so a
    /// kill right after this returns loses nothing. Pausing while already paused
    /// saves again and is otherwise a no-op.
    pub fn pause(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Playing | SessionState::Paused) {
            return Err(self.invalid("pause"));
        }
        self.save_offset();
        if self.state == SessionState::Paused {
            return Ok(());
        }
        if let Some(player) = self.player.as_mut() {
            player.pause()?;
        }
        self.state = SessionState::Paused;
        Ok(())
    }

    /// Paused -> Playing. The store is not consulted again; the player's own
    /// offset is authoritative while the session lives.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Playing => Ok(()),
            SessionState::Paused => {
                if let Some(player) = self.player.as_mut() {
                    player.play()?;
                }
                self.state = SessionState::Playing;
                Ok(())
            }
            _ => Err(self.invalid("resume")),
        }
    }

    /// Playing|Paused -> Terminated: save the offset, then release the player.
    /// Idle sessions terminate without touching the store. Repeated calls are
    /// no-ops. Returns the offset the session ended at.
    pub fn terminate(&mut self) -> u64 {
        match self.state {
            SessionState::Playing | SessionState::Paused => {
                self.save_offset();
                if let Some(mut player) = self.player.take() {
                    player.release();
                }
                self.claim = None;
                tracing::info!(
                    "Stopped {} at {} ms",
                    self.identity.name(),
                    self.last_offset
                );
            }
            SessionState::Idle | SessionState::Starting | SessionState::Terminated => {}
        }
        self.state = SessionState::Terminated;
        self.last_offset
    }

    fn save_offset(&mut self) {
        if let Some(player) = self.player.as_ref() {
            self.last_offset = player.current_offset();
        }
        // Best-effort: the store logs and swallows write failures
        self.store.set(self.identity.key(), self.last_offset);
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state,
            action,
        }
    }
}

impl<P: Player> Drop for PlaybackSession<P> {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Playing | SessionState::Paused) {
            self.terminate();
        }
    }
}
