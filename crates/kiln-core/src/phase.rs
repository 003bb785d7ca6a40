//! The compiled, ordered phase list.
//!
//! A [`BuildPhases`] is the engine's execution plan: every in-build phase is
//! one builder application, and an optional trailing post-build phase holds
//! the post-process actions. Phase order is declaration order; outputs of
//! phase `p` are only visible to phases after `p`.

use std::rc::Rc;

use kiln_asset::{Glob, GlobError};

use crate::builder::{
    Builder, BuilderApplication, PostProcessApplication, PostProcessBuilder,
};
use crate::error::ExtensionError;

/// Include/exclude glob sets scoping the inputs a phase considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSet {
    include: Vec<Glob>,
    exclude: Vec<Glob>,
}

impl InputSet {
    pub fn new<I, E>(include: I, exclude: E) -> Result<InputSet, GlobError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(InputSet {
            include: include
                .into_iter()
                .map(|p| Glob::new(p.as_ref()))
                .collect::<Result<_, _>>()?,
            exclude: exclude
                .into_iter()
                .map(|p| Glob::new(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Matches every path.
    pub fn anything() -> InputSet {
        InputSet {
            include: vec![Glob::new("**").expect("`**` is a valid glob")],
            exclude: Vec::new(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.include.iter().any(|g| g.matches(path))
            && !self.exclude.iter().any(|g| g.matches(path))
    }
}

impl Default for InputSet {
    fn default() -> Self {
        InputSet::anything()
    }
}

/// Selects the packages a phase applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPackageFilter {
    /// Every package in the build.
    All,
    /// Only the root package.
    RootOnly,
    /// Only the named packages.
    Only(Vec<String>),
}

impl TargetPackageFilter {
    pub fn matches(&self, package: &str, is_root: bool) -> bool {
        match self {
            TargetPackageFilter::All => true,
            TargetPackageFilter::RootOnly => is_root,
            TargetPackageFilter::Only(names) => names.iter().any(|n| n == package),
        }
    }
}

/// One in-build phase: a single builder application.
#[derive(Clone)]
pub struct InBuildPhase {
    pub(crate) phase_number: usize,
    pub(crate) key: String,
    pub(crate) builder: Rc<dyn Builder>,
    pub(crate) target_packages: TargetPackageFilter,
    pub(crate) generate_for: InputSet,
    pub(crate) is_optional: bool,
    pub(crate) hide_output: bool,
}

impl InBuildPhase {
    pub fn phase_number(&self) -> usize {
        self.phase_number
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_optional(&self) -> bool {
        self.is_optional
    }

    pub fn hide_output(&self) -> bool {
        self.hide_output
    }
}

impl std::fmt::Debug for InBuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InBuildPhase")
            .field("phase_number", &self.phase_number)
            .field("key", &self.key)
            .field("is_optional", &self.is_optional)
            .field("hide_output", &self.hide_output)
            .finish_non_exhaustive()
    }
}

/// One post-process action within the trailing post-build phase.
#[derive(Clone)]
pub struct PostBuildAction {
    pub(crate) key: String,
    pub(crate) builder: Rc<dyn PostProcessBuilder>,
    pub(crate) target_packages: TargetPackageFilter,
    pub(crate) generate_for: InputSet,
}

impl PostBuildAction {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for PostBuildAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostBuildAction")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A phase is either one builder application or the post-build action list.
#[derive(Debug, Clone)]
pub enum BuildPhase {
    InBuild(InBuildPhase),
    PostBuild(Vec<PostBuildAction>),
}

/// The compiled, ordered list of phases.
#[derive(Debug, Clone, Default)]
pub struct BuildPhases {
    phases: Vec<BuildPhase>,
}

impl BuildPhases {
    /// Compile builder applications into ordered phases.
    ///
    /// Extension declarations were already validated when each
    /// [`BuildExtensions`](crate::BuildExtensions) was parsed; this step
    /// only assembles the plan. Phase numbers are assigned in declaration
    /// order, with the post-build phase last.
    pub fn new(
        applications: Vec<BuilderApplication>,
        post_process: Vec<PostProcessApplication>,
    ) -> Result<BuildPhases, ExtensionError> {
        let mut phases = Vec::with_capacity(applications.len() + 1);
        for (phase_number, app) in applications.into_iter().enumerate() {
            phases.push(BuildPhase::InBuild(InBuildPhase {
                phase_number,
                key: app.key,
                builder: app.builder,
                target_packages: app.target_packages,
                generate_for: app.generate_for.unwrap_or_default(),
                is_optional: app.is_optional,
                hide_output: app.hide_output,
            }));
        }
        if !post_process.is_empty() {
            let actions = post_process
                .into_iter()
                .map(|app| PostBuildAction {
                    key: app.key,
                    builder: app.builder,
                    target_packages: app.target_packages,
                    generate_for: app.generate_for.unwrap_or_default(),
                })
                .collect();
            phases.push(BuildPhase::PostBuild(actions));
        }
        Ok(BuildPhases { phases })
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn phases(&self) -> &[BuildPhase] {
        &self.phases
    }

    /// The in-build phase with the given number, if it is one.
    pub fn in_build(&self, phase_number: usize) -> Option<&InBuildPhase> {
        match self.phases.get(phase_number) {
            Some(BuildPhase::InBuild(phase)) => Some(phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StepError;
    use crate::extensions::BuildExtensions;
    use crate::step::BuildStep;
    use async_trait::async_trait;

    struct NoopBuilder {
        extensions: BuildExtensions,
    }

    #[async_trait(?Send)]
    impl Builder for NoopBuilder {
        fn build_extensions(&self) -> &BuildExtensions {
            &self.extensions
        }

        async fn build(&self, _step: &BuildStep) -> Result<(), StepError> {
            Ok(())
        }
    }

    fn noop(input: &str, output: &str) -> Rc<dyn Builder> {
        Rc::new(NoopBuilder {
            extensions: BuildExtensions::parse("noop", [(input, vec![output])]).unwrap(),
        })
    }

    #[test]
    fn test_input_set_include_exclude() {
        let set = InputSet::new(["web/**"], ["web/skip/**"]).unwrap();
        assert!(set.matches("web/a.txt"));
        assert!(!set.matches("web/skip/a.txt"));
        assert!(!set.matches("lib/a.txt"));
        assert!(InputSet::anything().matches("anything/at/all.txt"));
    }

    #[test]
    fn test_target_package_filter() {
        assert!(TargetPackageFilter::All.matches("b", false));
        assert!(TargetPackageFilter::RootOnly.matches("a", true));
        assert!(!TargetPackageFilter::RootOnly.matches("b", false));
        let only = TargetPackageFilter::Only(vec!["b".to_string()]);
        assert!(only.matches("b", false));
        assert!(!only.matches("a", true));
    }

    #[test]
    fn test_phase_numbers_follow_declaration_order() {
        let phases = BuildPhases::new(
            vec![
                BuilderApplication::new("one", noop(".txt", ".txt.1")),
                BuilderApplication::new("two", noop(".1", ".1.2")),
            ],
            Vec::new(),
        )
        .unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases.in_build(0).unwrap().key(), "one");
        assert_eq!(phases.in_build(1).unwrap().key(), "two");
        assert!(phases.in_build(2).is_none());
    }
}
