//! engine::workspace
//!
//! The [`Workspace`] value, its builder and the read-only queries.
//!
//! # Trees
//!
//! Two element trees are kept: `committed`, what callers outside an
//! operation see, and `working`, where operations stage their edits. A
//! thread inside an operation reads the working tree (so it sees its own
//! edits); everyone else reads the committed one. Infos handed out are
//! clones.
//!
//! # Locations
//!
//! A resource's backing location is derived, not stored: the project's
//! location (custom or `<root>/<name>`), or the nearest linked ancestor's
//! resolved target, joined with the remaining segments.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use super::alias::AliasManager;
use super::hooks::{DefaultHook, MoveDeleteHook};
use super::notify::{ListenerId, Notifier, ResourceChangeListener};
use super::refresh::RefreshManager;
use super::WorkspaceError;
use crate::core::config::Config;
use crate::core::flags::Depth;
use crate::core::info::{ProjectDescription, ResourceInfo};
use crate::core::ops::{LockManager, WorkspaceLock};
use crate::core::path::ResourcePath;
use crate::core::paths::WorkspacePaths;
use crate::core::resource::Resource;
use crate::core::tree::{ElementTree, Visit};
use crate::fs::{FileSystem, LocalFileSystem, MemoryFileSystem, PathVariableResolver, PathVariables};
use crate::store::Stores;

pub(crate) struct Trees {
    pub(crate) committed: ElementTree,
    pub(crate) working: ElementTree,
}

pub(crate) struct WorkspaceInner {
    pub(crate) paths: WorkspacePaths,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) variables: Arc<dyn PathVariableResolver>,
    pub(crate) hook: Arc<dyn MoveDeleteHook>,
    pub(crate) stores: Stores,
    pub(crate) config: Config,
    pub(crate) case_sensitive: bool,
    pub(crate) locks: Arc<LockManager>,
    trees: Mutex<Trees>,
    next_node_id: AtomicU64,
    next_stamp: AtomicI64,
    pub(crate) aliases: Mutex<AliasManager>,
    pub(crate) notifier: Notifier,
    pub(crate) refresher: RefreshManager,
    _disk_lock: Option<WorkspaceLock>,
}

impl WorkspaceInner {
    pub(crate) fn trees(&self) -> MutexGuard<'_, Trees> {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn aliases(&self) -> MutexGuard<'_, AliasManager> {
        self.aliases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A hierarchical workspace of resources layered over a filesystem.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Workspace {
    pub(crate) inner: Arc<WorkspaceInner>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.inner.paths.root())
            .field("case_sensitive", &self.inner.case_sensitive)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Workspace`] from its collaborators.
pub struct WorkspaceBuilder {
    root: PathBuf,
    fs: Option<Arc<dyn FileSystem>>,
    variables: Option<Arc<dyn PathVariableResolver>>,
    hook: Option<Arc<dyn MoveDeleteHook>>,
    stores: Option<Stores>,
    config: Option<Config>,
    disk_lock: bool,
}

impl WorkspaceBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fs: None,
            variables: None,
            hook: None,
            stores: None,
            config: None,
            disk_lock: false,
        }
    }

    pub fn fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn variables(mut self, variables: Arc<dyn PathVariableResolver>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn MoveDeleteHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Take `<root>/.canopy/lock` for the workspace's lifetime.
    pub fn disk_lock(mut self, enabled: bool) -> Self {
        self.disk_lock = enabled;
        self
    }

    pub fn build(self) -> Result<Workspace, WorkspaceError> {
        let paths = WorkspacePaths::new(self.root);
        let config = self.config.unwrap_or_default();
        let fs = self
            .fs
            .unwrap_or_else(|| Arc::new(LocalFileSystem::detect(paths.root())));
        let case_sensitive = config
            .case_sensitive()
            .unwrap_or_else(|| fs.is_case_sensitive());
        let disk_lock = if self.disk_lock {
            Some(WorkspaceLock::acquire(&paths)?)
        } else {
            None
        };
        if let Err(e) = fs.mkdir(paths.root()) {
            warn!("could not create workspace root {}: {e}", paths.root().display());
        }

        let locks = Arc::new(LockManager::new(config.lock_poll_interval()));
        let notifier = Notifier::new(
            Arc::clone(&locks),
            config.notification_enabled(),
            config.notification_capacity(),
        );
        let stores = self
            .stores
            .unwrap_or_else(|| Stores::in_memory(config.history_max_states()));
        let tree = ElementTree::new();
        let mut aliases = AliasManager::default();
        aliases.insert(paths.root().to_path_buf(), ResourcePath::root());

        debug!(
            "workspace at {} (case sensitive: {case_sensitive})",
            paths.root().display()
        );
        Ok(Workspace {
            inner: Arc::new(WorkspaceInner {
                paths,
                fs,
                variables: self
                    .variables
                    .unwrap_or_else(|| Arc::new(PathVariables::new())),
                hook: self.hook.unwrap_or_else(|| Arc::new(DefaultHook)),
                stores,
                config,
                case_sensitive,
                locks,
                trees: Mutex::new(Trees {
                    committed: tree.clone(),
                    working: tree,
                }),
                next_node_id: AtomicU64::new(1),
                next_stamp: AtomicI64::new(1),
                aliases: Mutex::new(aliases),
                notifier,
                refresher: RefreshManager::default(),
                _disk_lock: disk_lock,
            }),
        })
    }
}

impl Workspace {
    pub fn builder(root: impl Into<PathBuf>) -> WorkspaceBuilder {
        WorkspaceBuilder::new(root)
    }

    /// Open a workspace on the local disk at `root`.
    ///
    /// Loads configuration and takes the cross-process lock.
    pub fn open(root: &Path) -> Result<Workspace, WorkspaceError> {
        let config = Config::load(Some(root))?.config;
        WorkspaceBuilder::new(root)
            .fs(Arc::new(LocalFileSystem::detect(root)))
            .config(config)
            .disk_lock(true)
            .build()
    }

    /// A workspace over a fresh [`MemoryFileSystem`] rooted at `/ws`.
    pub fn in_memory() -> Result<Workspace, WorkspaceError> {
        WorkspaceBuilder::new("/ws")
            .fs(Arc::new(MemoryFileSystem::new()))
            .build()
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    pub fn paths(&self) -> &WorkspacePaths {
        &self.inner.paths
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.inner.fs
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.inner.case_sensitive
    }

    pub fn add_listener(&self, listener: Arc<dyn ResourceChangeListener>) -> ListenerId {
        self.inner.notifier.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.notifier.remove_listener(id)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    pub(crate) fn next_node_id(&self) -> u64 {
        self.inner.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_stamp(&self) -> i64 {
        self.inner.next_stamp.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Tree access
    // =========================================================================

    /// Run `f` on the tree the calling thread should see.
    pub(crate) fn read_tree<T>(&self, f: impl FnOnce(&ElementTree) -> T) -> T {
        let in_op = self.inner.locks.in_operation();
        let trees = self.inner.trees();
        f(if in_op { &trees.working } else { &trees.committed })
    }

    /// Edit the working tree under the workspace lock.
    ///
    /// Reentrant: takes the lock if the caller sits in an unprotected window
    /// and keeps it otherwise. Only legal inside an operation.
    pub(crate) fn locked<T>(
        &self,
        f: impl FnOnce(&mut ElementTree) -> T,
    ) -> Result<T, WorkspaceError> {
        let locks = &self.inner.locks;
        if !locks.in_operation() {
            return Err(WorkspaceError::IllegalState(
                "tree edit outside an operation".into(),
            ));
        }
        locks.acquire_workspace_lock();
        let value = {
            let mut trees = self.inner.trees();
            f(&mut trees.working)
        };
        locks.release_workspace_lock()?;
        Ok(value)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether a non-phantom resource of the same kind exists.
    pub fn exists(&self, resource: &Resource) -> bool {
        self.read_tree(|t| {
            t.existing(resource.path())
                .is_some_and(|i| i.kind() == resource.kind())
        })
    }

    /// A copy of the resource's info; `None` for missing and phantom resources.
    pub fn info(&self, resource: &Resource) -> Option<ResourceInfo> {
        self.read_tree(|t| t.existing(resource.path()).cloned())
    }

    /// A copy of the info at `path`, phantoms included.
    pub fn info_with_phantoms(&self, path: &ResourcePath) -> Option<ResourceInfo> {
        self.read_tree(|t| t.get(path).cloned())
    }

    /// The existing resource at `path`, typed by its info.
    pub fn resource_at(&self, path: &ResourcePath) -> Option<Resource> {
        self.read_tree(|t| {
            t.existing(path)
                .and_then(|i| Resource::new(i.kind(), path.clone()).ok())
        })
    }

    /// Existing members of a container, sorted by path.
    pub fn members(&self, container: &Resource) -> Vec<Resource> {
        self.collect_members(container, false)
    }

    /// Members including phantoms.
    pub fn members_with_phantoms(&self, container: &Resource) -> Vec<Resource> {
        self.collect_members(container, true)
    }

    fn collect_members(&self, container: &Resource, phantoms: bool) -> Vec<Resource> {
        self.read_tree(|t| {
            t.children(container.path())
                .into_iter()
                .filter_map(|p| {
                    let info = t.get(&p)?;
                    if info.is_phantom() && !phantoms {
                        return None;
                    }
                    Resource::new(info.kind(), p).ok()
                })
                .collect()
        })
    }

    /// Visit existing resources at and below `path`, pre-order.
    ///
    /// Returns `true` if the visitor stopped early.
    pub fn visit<F>(&self, path: &ResourcePath, depth: Depth, mut visitor: F) -> bool
    where
        F: FnMut(&Resource, &ResourceInfo) -> Visit,
    {
        self.read_tree(|t| {
            t.visit(path, depth, |p, info| {
                if info.is_phantom() {
                    return Visit::SkipChildren;
                }
                match Resource::new(info.kind(), p.clone()) {
                    Ok(resource) => visitor(&resource, info),
                    Err(_) => Visit::SkipChildren,
                }
            })
        })
    }

    /// The backing filesystem location.
    ///
    /// `None` for virtual folders and links whose target does not resolve.
    pub fn location(&self, resource: &Resource) -> Option<PathBuf> {
        self.read_tree(|t| self.location_in(t, resource.path()))
    }

    pub(crate) fn location_in(&self, tree: &ElementTree, path: &ResourcePath) -> Option<PathBuf> {
        let Some(project) = path.project_name() else {
            return Some(self.inner.paths.root().to_path_buf());
        };
        let project_path = path.truncate(1);
        let description = tree
            .get(&project_path)
            .and_then(ResourceInfo::project_description);

        for depth in (2..=path.segment_count()).rev() {
            let ancestor = path.truncate(depth);
            if !tree.get(&ancestor).is_some_and(ResourceInfo::is_linked) {
                continue;
            }
            let relative = ancestor.strip_prefix(&project_path)?;
            let link = description.and_then(|d| d.link(&relative))?;
            let base = self.inner.variables.resolve(&link.location).ok()??;
            return Some(join_segments(base, &path.segments()[depth..]));
        }

        let base = description
            .and_then(|d| d.location.clone())
            .unwrap_or_else(|| self.inner.paths.default_project_location(project));
        Some(join_segments(base, &path.segments()[1..]))
    }

    /// The existing resource whose path matches `path` ignoring case.
    pub fn find_variant(&self, path: &ResourcePath) -> Option<ResourcePath> {
        self.read_tree(|t| t.resolve_ignoring_case(path))
    }

    /// An immutable snapshot of the committed tree.
    pub fn snapshot(&self) -> ElementTree {
        self.inner.trees().committed.clone()
    }

    /// Whether `snapshot` still matches the committed generation.
    pub fn is_current(&self, snapshot: &ElementTree) -> bool {
        self.inner.trees().committed.generation() == snapshot.generation()
    }

    pub fn project_description(&self, project: &Resource) -> Option<ProjectDescription> {
        self.read_tree(|t| {
            t.get(&project.path().truncate(1))
                .and_then(ResourceInfo::project_description)
                .cloned()
        })
    }
}

pub(crate) fn join_segments(base: PathBuf, segments: &[String]) -> PathBuf {
    segments.iter().fold(base, |acc, s| acc.join(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::info::{InfoFlags, LinkDescription, LinkLocation};
    use crate::core::resource::ResourceKind;
    use crate::core::rule::SchedulingRule;
    use crate::core::progress::Progress;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn workspace() -> Workspace {
        let ws = Workspace::in_memory().unwrap();
        ws.create_project("p", None, &Progress::new()).unwrap();
        ws
    }

    mod locations {
        use super::*;

        #[test]
        fn default_layout() {
            let ws = workspace();
            let file = Resource::file("/p/a/b.txt").unwrap();
            assert_eq!(ws.location(&file), Some(PathBuf::from("/ws/p/a/b.txt")));
            assert_eq!(ws.location(&Resource::Root), Some(PathBuf::from("/ws")));
        }

        #[test]
        fn linked_ancestor_wins() {
            let ws = workspace();
            ws.run(&SchedulingRule::root(), &Progress::new(), |ws| {
                ws.locked(|t| {
                    let mut info = ResourceInfo::new(ResourceKind::Folder, 99, 1);
                    info.set_flag(InfoFlags::LINKED, true);
                    t.insert(p("/p/lnk"), info).unwrap();
                    t.get_mut(&p("/p"))
                        .unwrap()
                        .project_description_mut()
                        .unwrap()
                        .add_link(LinkDescription {
                            path: p("/lnk"),
                            location: LinkLocation::path("/elsewhere"),
                            kind: ResourceKind::Folder,
                        });
                })
            })
            .unwrap();
            let nested = Resource::file("/p/lnk/x/y.txt").unwrap();
            assert_eq!(ws.location(&nested), Some(PathBuf::from("/elsewhere/x/y.txt")));
        }
    }

    #[test]
    fn locked_outside_operation_is_illegal() {
        let ws = workspace();
        let err = ws.locked(|_| ()).unwrap_err();
        assert!(matches!(err, WorkspaceError::IllegalState(_)));
    }

    #[test]
    fn members_hide_phantoms() {
        let ws = workspace();
        let progress = Progress::new();
        let file = Resource::file("/p/f").unwrap();
        ws.create_file(&file, b"", &progress).unwrap();
        ws.set_sync_info(&file, crate::core::info::QualifiedName::new("vcs", "rev"), Some(vec![1]), &progress)
            .unwrap();
        ws.delete(&[file.clone()], crate::core::flags::UpdateFlags::NONE, &progress)
            .unwrap();

        let project = Resource::project_named("p").unwrap();
        assert!(ws.members(&project).is_empty());
        assert_eq!(ws.members_with_phantoms(&project), vec![file]);
    }

    #[test]
    fn find_variant_follows_existing_case() {
        let ws = WorkspaceBuilder::new("/ws")
            .fs(Arc::new(MemoryFileSystem::case_insensitive()))
            .build()
            .unwrap();
        let progress = Progress::new();
        ws.create_project("p", None, &progress).unwrap();
        ws.create_folder(&Resource::folder("/p/Foo").unwrap(), &progress)
            .unwrap();

        assert_eq!(ws.find_variant(&p("/P/FOO")), Some(p("/p/Foo")));
        assert_eq!(ws.find_variant(&p("/p/Foo")), Some(p("/p/Foo")));
        assert_eq!(ws.find_variant(&p("/p/bar")), None);
    }

    #[test]
    fn snapshot_goes_stale_after_commit() {
        let ws = workspace();
        let snapshot = ws.snapshot();
        assert!(ws.is_current(&snapshot));
        ws.touch(&Resource::project_named("p").unwrap(), &Progress::new())
            .unwrap();
        assert!(!ws.is_current(&snapshot));
    }
}
