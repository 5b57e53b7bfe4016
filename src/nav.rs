use crate::media::library::VideoIdentity;

/// Which screen the host shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    List,
    Player(VideoIdentity),
}

/// List <-> Player navigation, held explicitly instead of as ambient UI state.
///
/// The navigator only tracks where the user is. Creating and tearing down the
/// playback session around a transition is the host's job.
#[derive(Debug, Default)]
pub struct Navigator {
    screen: Screen,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Video currently open, if any.
    pub fn selected(&self) -> Option<&VideoIdentity> {
        match &self.screen {
            Screen::List => None,
            Screen::Player(identity) => Some(identity),
        }
    }

    /// Open a video from the list. Ignored (returns false) while a video is
    /// already open: the previous one has to be closed first.
    pub fn select(&mut self, identity: VideoIdentity) -> bool {
        if let Screen::Player(open) = &self.screen {
            tracing::debug!("Ignoring selection of {} while {} is open", identity.key(), open.key());
            return false;
        }
        self.screen = Screen::Player(identity);
        true
    }

    /// Back to the list. Returns the video that was open.
    pub fn back(&mut self) -> Option<VideoIdentity> {
        match std::mem::take(&mut self.screen) {
            Screen::List => None,
            Screen::Player(identity) => Some(identity),
        }
    }
}
