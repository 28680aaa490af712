use crate::error::Error;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Initial state. Events are accepted but nothing is driven.
    #[default]
    Stopped,
    /// Started by the system manager.
    Running,
}

impl RunState {
    pub fn is_running(self) -> bool {
        self == RunState::Running
    }

    /// Checks that `Stopped -> Running` is valid, without committing it.
    ///
    /// Managers commit with [`RunState::set_running`] only once every side
    /// effect of starting has succeeded.
    pub fn check_start(self) -> Result<(), Error> {
        match self {
            RunState::Stopped => Ok(()),
            RunState::Running => Err(Error::AlreadyRunning),
        }
    }

    pub fn check_stop(self) -> Result<(), Error> {
        match self {
            RunState::Running => Ok(()),
            RunState::Stopped => Err(Error::NotRunning),
        }
    }

    pub fn set_running(&mut self) {
        *self = RunState::Running;
    }

    pub fn set_stopped(&mut self) {
        *self = RunState::Stopped;
    }
}
