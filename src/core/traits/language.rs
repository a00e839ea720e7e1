use itertools::Itertools;

use crate::core::domain::Language;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

/// Files to write into a workspace plus the commands that build and run
/// them. Commands are shell command lines evaluated with the workspace as
/// the working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchPlan {
    pub files: Vec<SourceFile>,
    pub build: Option<String>,
    pub run: String,
}

impl LaunchPlan {
    pub fn command_line(&self) -> String {
        self.build.iter().chain(std::iter::once(&self.run)).join(" && ")
    }
}

pub trait LanguageAdapter: std::fmt::Debug + Send + Sync {
    fn language(&self) -> Language;

    fn plan(&self, code: &str) -> LaunchPlan;
}
