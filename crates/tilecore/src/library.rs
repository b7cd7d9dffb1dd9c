//! A set of item controllers sharing one pipeline and one set of callbacks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::CatalogItem;
use crate::controller::{Callbacks, ErrorNotice, ItemController, ItemState, Pipeline};
use crate::download::ProgressEvent;

const WAIT_POLL: Duration = Duration::from_millis(25);

pub struct Library {
    pipeline: Arc<Pipeline>,
    controllers: HashMap<u64, ItemController>,
    callbacks: Callbacks,
}

impl Library {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            controllers: HashMap::new(),
            callbacks: Callbacks::default(),
        }
    }

    /// Add an item, or return the existing controller for its id.
    pub fn add(&mut self, item: CatalogItem) -> &mut ItemController {
        let pipeline = &self.pipeline;
        let callbacks = &self.callbacks;
        self.controllers.entry(item.id).or_insert_with(|| {
            let mut controller = ItemController::new(Arc::new(item), Arc::clone(pipeline));
            controller.set_callbacks(callbacks.clone());
            controller
        })
    }

    pub fn get(&self, id: u64) -> Option<&ItemController> {
        self.controllers.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ItemController> {
        self.controllers.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Controllers ordered by item name, case-insensitively.
    pub fn sorted(&self) -> Vec<&ItemController> {
        let mut items: Vec<_> = self.controllers.values().collect();
        items.sort_by_cached_key(|c| (c.item().name.to_lowercase(), c.item().id));
        items
    }

    /// Installed (or not installed) items, sorted by name.
    pub fn filter(&self, installed: bool) -> Vec<&ItemController> {
        self.sorted()
            .into_iter()
            .filter(|c| {
                let is_installed =
                    matches!(c.state(), ItemState::Installed | ItemState::LaunchFailed(_));
                is_installed == installed
            })
            .collect()
    }

    pub fn on_progress(&mut self, cb: impl Fn(u64, &ProgressEvent) + 'static) {
        self.callbacks.on_progress(cb);
        self.sync_callbacks();
    }

    pub fn on_state_changed(&mut self, cb: impl Fn(u64, &ItemState) + 'static) {
        self.callbacks.on_state_changed(cb);
        self.sync_callbacks();
    }

    pub fn on_error(&mut self, cb: impl Fn(u64, &ErrorNotice) + 'static) {
        self.callbacks.on_error(cb);
        self.sync_callbacks();
    }

    fn sync_callbacks(&mut self) {
        for controller in self.controllers.values_mut() {
            controller.set_callbacks(self.callbacks.clone());
        }
    }

    pub fn is_busy(&self) -> bool {
        self.controllers.values().any(ItemController::is_busy)
    }

    /// Re-read every idle item's state from disk.
    pub fn refresh(&mut self) {
        for controller in self.controllers.values_mut() {
            controller.load_state();
        }
    }

    /// Apply pending worker reports for every item.
    pub fn pump(&mut self) -> usize {
        self.controllers.values_mut().map(ItemController::pump).sum()
    }

    /// Pump until no item has work in flight.
    pub fn wait_all(&mut self) {
        while self.is_busy() {
            if self.pump() == 0 {
                std::thread::sleep(WAIT_POLL);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::catalog::CatalogFile;
    use crate::config::Settings;

    fn library(tmp: &tempfile::TempDir) -> Library {
        let settings = Settings {
            library_root: tmp.path().join("library"),
            cache_dir: tmp.path().join("cache"),
            ..Settings::default()
        };
        let catalog = CatalogFile::parse("[]").unwrap();
        Library::new(Arc::new(Pipeline::new(&settings, Arc::new(catalog))))
    }

    #[test]
    fn test_sorted_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lib = library(&tmp);
        lib.add(CatalogItem::new(3, "tyrian 2000", ""));
        lib.add(CatalogItem::new(1, "Beneath a Steel Sky", ""));
        lib.add(CatalogItem::new(2, "Flight of the Amazon Queen", ""));

        let names: Vec<_> = lib.sorted().iter().map(|c| c.item().name.clone()).collect();
        assert_eq!(
            names,
            vec!["Beneath a Steel Sky", "Flight of the Amazon Queen", "tyrian 2000"]
        );
    }

    #[test]
    fn test_add_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lib = library(&tmp);
        lib.add(CatalogItem::new(1, "Teenagent", ""));
        lib.add(CatalogItem::new(1, "Teenagent", ""));
        assert_eq!(lib.len(), 1);
    }

    #[test]
    fn test_filter_and_refresh() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lib = library(&tmp);
        lib.add(CatalogItem::new(1, "Teenagent", ""));
        lib.add(CatalogItem::new(2, "Tyrian 2000", ""));
        assert_eq!(lib.filter(true).len(), 0);

        let dir = tmp.path().join("library/Teenagent");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("gameinfo"), "").unwrap();

        let changed = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&changed);
        lib.on_state_changed(move |id, state| sink.borrow_mut().push((id, state.clone())));
        lib.refresh();

        assert_eq!(*changed.borrow(), vec![(1, ItemState::Installed)]);
        assert_eq!(lib.filter(true).len(), 1);
        assert_eq!(lib.filter(false)[0].item().id, 2);
    }

    #[test]
    fn test_failed_install_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lib = library(&tmp);
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        lib.on_error(move |id, _| sink.borrow_mut().push(id));

        lib.add(CatalogItem::new(1, "Teenagent", ""));
        lib.add(CatalogItem::new(2, "Tyrian 2000", ""));

        // the empty catalog has no downlink for anything
        lib.get_mut(1).unwrap().request_install().unwrap();
        lib.wait_all();

        assert_eq!(*errors.borrow(), vec![1]);
        assert_eq!(lib.get(1).unwrap().state(), &ItemState::NotInstalled);
        assert_eq!(lib.get(2).unwrap().state(), &ItemState::NotInstalled);
        assert!(!lib.is_busy());
    }
}
