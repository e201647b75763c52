//! The application registry: thread lifecycle, lookups, abort and readiness

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::config::AppConfig;
use super::join::TrieadJoin;
use super::owner::TrieadOwner;
use super::record::{ThreadRecord, TrieadState};
use super::topology;
use super::triead::Triead;
use crate::error::{Result, TriesteError};
use crate::nexus::{Nexus, QueueEvent};

/// A thread that died but was not joined yet
pub(crate) struct Zombie {
    pub name: String,
    pub join: Box<dyn TrieadJoin>,
}

/// Everything protected by the App lock
pub(crate) struct AppState {
    pub threads: BTreeMap<String, ThreadRecord>,
    pub zombies: Vec<Zombie>,
    /// Thread name and message of the first abort
    pub aborted: Option<(String, String)>,
    pub deadline: Instant,
    /// Counted threads not ready yet
    pub unready: usize,
    /// Counted threads not dead yet
    pub alive: usize,
    /// All threads have been ready at some point; no more can be added
    pub ready_fired: bool,
    pub need_harvest: bool,
    /// Callers blocked in wait_ready
    pub ready_waiters: usize,
}

impl AppState {
    pub fn is_ready(&self) -> bool {
        self.aborted.is_some() || (!self.threads.is_empty() && self.unready == 0)
    }

    pub fn is_dead(&self) -> bool {
        self.alive == 0 && (!self.threads.is_empty() || self.aborted.is_some())
    }

    fn trieads(&self) -> Vec<Arc<Triead>> {
        self.threads
            .values()
            .filter_map(|r| r.triead.clone())
            .collect()
    }
}

/// A set of cooperating threads with its nexuses.
///
/// All the lifecycle transitions go through one lock and one condition
/// variable, broadcast on every change.
pub struct App {
    name: String,
    config: AppConfig,
    state: Mutex<AppState>,
    cond: Condvar,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("App")
            .field("name", &self.name)
            .field("threads", &st.threads)
            .field("aborted", &st.aborted)
            .finish()
    }
}

impl App {
    pub(crate) fn new(name: impl Into<String>, config: AppConfig) -> Self {
        let deadline = Instant::now() + config.timeout();
        Self {
            name: name.into(),
            config,
            state: Mutex::new(AppState {
                threads: BTreeMap::new(),
                zombies: Vec::new(),
                aborted: None,
                deadline,
                unready: 0,
                alive: 0,
                ready_fired: false,
                need_harvest: false,
                ready_waiters: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait on the App condition until `done` holds or `deadline` passes.
    /// Returns the guard and whether `done` held.
    pub(crate) fn wait_until<'a, F>(
        &'a self,
        mut st: MutexGuard<'a, AppState>,
        deadline: Option<Instant>,
        mut done: F,
    ) -> (MutexGuard<'a, AppState>, bool)
    where
        F: FnMut(&AppState) -> bool,
    {
        loop {
            if done(&st) {
                return (st, true);
            }
            match deadline {
                None => st = self.cond.wait(st).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return (st, false);
                    }
                    st = self
                        .cond
                        .wait_timeout(st, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    fn check_aborted(&self, st: &AppState) -> Result<()> {
        match &st.aborted {
            Some((by, msg)) => Err(TriesteError::aborted(&self.name, by, msg)),
            None => Ok(()),
        }
    }

    /// Set the initialization deadline to `secs` seconds from now.
    /// Only allowed before any thread is declared.
    pub fn set_timeout(&self, secs: u64) -> Result<()> {
        self.set_deadline(Instant::now() + Duration::from_secs(secs))
    }

    /// Set the initialization deadline. Only allowed before any thread is
    /// declared.
    pub fn set_deadline(&self, deadline: Instant) -> Result<()> {
        let mut st = self.lock();
        if !st.threads.is_empty() {
            return Err(TriesteError::invalid_state(format!(
                "app '{}': the deadline can not be changed after threads are declared",
                self.name
            )));
        }
        st.deadline = deadline;
        Ok(())
    }

    pub fn deadline(&self) -> Instant {
        self.lock().deadline
    }

    fn check_new_thread(&self, st: &AppState, tname: &str) -> Result<()> {
        if tname.is_empty() {
            return Err(TriesteError::invalid_parameter(
                "thread name",
                "must not be empty",
            ));
        }
        self.check_aborted(st)?;
        if st.ready_fired && !st.threads.contains_key(tname) {
            return Err(TriesteError::invalid_state(format!(
                "app '{}': thread '{}' can not be added after the app became ready",
                self.name, tname
            )));
        }
        Ok(())
    }

    /// Reserve a thread name without defining the thread. Declaring an
    /// existing name does nothing.
    pub fn declare_triead(&self, tname: &str) -> Result<()> {
        let mut st = self.lock();
        self.check_new_thread(&st, tname)?;
        if st.threads.contains_key(tname) {
            return Ok(());
        }
        st.threads.insert(tname.to_string(), ThreadRecord::declared());
        st.unready += 1;
        st.alive += 1;
        log::debug!("app '{}': thread '{}' declared", self.name, tname);
        Ok(())
    }

    /// Define a thread, declaring it if needed, and return its owner handle
    /// to be moved into the thread itself.
    pub fn make_triead(self: &Arc<Self>, tname: &str) -> Result<TrieadOwner> {
        let event = Arc::new(QueueEvent::new()?);
        let triead = {
            let mut st = self.lock();
            self.check_new_thread(&st, tname)?;
            let triead = Arc::new(Triead::new(self.name.clone(), tname));
            match st.threads.get_mut(tname) {
                Some(rec) if rec.triead.is_some() => {
                    return Err(TriesteError::duplicate("thread", tname));
                }
                Some(rec) => rec.triead = Some(triead.clone()),
                None => {
                    st.threads
                        .insert(tname.to_string(), ThreadRecord::defined(triead.clone()));
                    st.unready += 1;
                    st.alive += 1;
                }
            }
            log::debug!("app '{}': thread '{}' defined", self.name, tname);
            triead
        };
        Ok(TrieadOwner::new(self.clone(), triead, event))
    }

    /// Register how to join a thread. If the thread is already dead the
    /// joiner goes straight to the harvester.
    pub fn define_join(&self, tname: &str, join: impl TrieadJoin + 'static) -> Result<()> {
        let mut st = self.lock();
        let rec = st
            .threads
            .get_mut(tname)
            .ok_or_else(|| TriesteError::not_found("thread", tname))?;
        if rec.state() != TrieadState::Dead {
            rec.join = Some(Box::new(join));
            return Ok(());
        }
        st.zombies.push(Zombie {
            name: tname.to_string(),
            join: Box::new(join),
        });
        st.need_harvest = true;
        drop(st);
        self.notify();
        Ok(())
    }

    /// Names of all threads with their identity, if defined
    pub fn threads(&self) -> Vec<(String, Option<Arc<Triead>>)> {
        self.lock()
            .threads
            .iter()
            .map(|(name, rec)| (name.clone(), rec.triead.clone()))
            .collect()
    }

    pub fn triead_state(&self, tname: &str) -> Option<TrieadState> {
        self.lock().threads.get(tname).map(|r| r.state())
    }

    /// Number of callers blocked waiting for the thread to be constructed
    pub fn sleepers(&self, tname: &str) -> usize {
        self.lock().threads.get(tname).map_or(0, |r| r.sleepers)
    }

    /// Number of callers blocked waiting for the app to become ready
    pub fn ready_waiters(&self) -> usize {
        self.lock().ready_waiters
    }

    /// Abort the app. Only the first abort is remembered; every waiter is
    /// woken up and every later lifecycle call fails.
    pub fn abort(&self, tname: &str, msg: &str) {
        let mut st = self.lock();
        self.abort_l(&mut st, tname, msg);
        drop(st);
        self.notify();
    }

    fn abort_l(&self, st: &mut AppState, tname: &str, msg: &str) {
        if st.aborted.is_some() {
            return;
        }
        log::warn!("app '{}' aborted by thread '{}': {}", self.name, tname, msg);
        st.aborted = Some((tname.to_string(), msg.to_string()));
        // Declared threads never made can not be made any more; stop
        // counting them or the app would never become dead.
        let mut released = 0;
        for rec in st.threads.values_mut() {
            if rec.triead.is_none() && rec.counted {
                rec.counted = false;
                released += 1;
            }
        }
        st.unready -= released;
        st.alive -= released;
        if st.is_dead() {
            st.need_harvest = true;
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted.is_some()
    }

    /// Thread that aborted the app
    pub fn aborted_by(&self) -> Option<String> {
        self.lock().aborted.as_ref().map(|(by, _)| by.clone())
    }

    pub fn aborted_msg(&self) -> Option<String> {
        self.lock().aborted.as_ref().map(|(_, msg)| msg.clone())
    }

    /// All threads are ready, or the app has been aborted
    pub fn is_ready(&self) -> bool {
        self.lock().is_ready()
    }

    /// All threads are dead
    pub fn is_dead(&self) -> bool {
        self.lock().is_dead()
    }

    /// Wait until all threads are ready, up to the deadline
    pub fn wait_ready(&self) -> Result<()> {
        self.wait_ready_as(&self.name)
    }

    pub(crate) fn wait_ready_as(&self, caller: &str) -> Result<()> {
        let mut st = self.lock();
        self.check_aborted(&st)?;
        let deadline = st.deadline;
        st.ready_waiters += 1;
        let (mut st, ok) = self.wait_until(st, Some(deadline), |s| s.is_ready());
        st.ready_waiters -= 1;
        self.check_aborted(&st)?;
        if !ok {
            return Err(TriesteError::timeout(&self.name, caller, "the app to become ready"));
        }
        Ok(())
    }

    /// Wait until all threads are dead. Not bounded by the deadline.
    pub fn wait_dead(&self) {
        let st = self.lock();
        let _ = self.wait_until(st, None, |s| s.is_dead());
    }

    /// Walk the chain of waiters starting at `target`. Reaching `caller`
    /// means blocking would never end.
    fn check_deadlock(&self, st: &AppState, caller: &str, target: &str) -> Result<()> {
        let mut chain = vec![caller.to_string(), target.to_string()];
        let mut cur = target;
        for _ in 0..=st.threads.len() {
            let Some(next) = st.threads.get(cur).and_then(|r| r.waiting_for.as_deref()) else {
                return Ok(());
            };
            chain.push(next.to_string());
            if next == caller {
                return Err(TriesteError::Deadlock {
                    app: self.name.clone(),
                    caller: caller.to_string(),
                    target: target.to_string(),
                    chain: chain.join(" -> "),
                });
            }
            cur = next;
        }
        Ok(())
    }

    /// Find a thread by name on behalf of thread `caller`.
    ///
    /// Unless `immediate`, waits for the thread to be constructed, up to the
    /// deadline. A thread looking up itself gets its identity right away.
    pub(crate) fn find_triead(
        &self,
        caller: &str,
        tname: &str,
        immediate: bool,
    ) -> Result<Arc<Triead>> {
        let mut st = self.lock();
        self.check_aborted(&st)?;
        let rec = st
            .threads
            .get(tname)
            .ok_or_else(|| TriesteError::not_found("thread", tname))?;
        if let Some(t) = &rec.triead {
            if immediate || tname == caller || t.is_constructed() {
                return Ok(t.clone());
            }
        } else if immediate {
            return Err(TriesteError::not_found("defined thread", tname));
        }

        self.check_deadlock(&st, caller, tname)?;
        if let Some(me) = st.threads.get_mut(caller) {
            me.waiting_for = Some(tname.to_string());
        }
        if let Some(rec) = st.threads.get_mut(tname) {
            rec.sleepers += 1;
        }
        self.notify();
        log::trace!(
            "app '{}': thread '{}' waits for thread '{}'",
            self.name,
            caller,
            tname
        );

        let deadline = st.deadline;
        let (mut st, ok) = self.wait_until(st, Some(deadline), |s| {
            s.aborted.is_some() || s.threads.get(tname).map_or(false, |r| r.is_constructed())
        });
        if let Some(me) = st.threads.get_mut(caller) {
            me.waiting_for = None;
        }
        if let Some(rec) = st.threads.get_mut(tname) {
            rec.sleepers -= 1;
        }
        self.check_aborted(&st)?;
        if !ok {
            return Err(TriesteError::timeout(
                &self.name,
                caller,
                format!("thread '{}' construction", tname),
            ));
        }
        st.threads
            .get(tname)
            .and_then(|r| r.triead.clone())
            .ok_or_else(|| TriesteError::not_found("thread", tname))
    }

    /// Find a nexus exported by thread `tname`, waiting for the thread to be
    /// constructed like [`find_triead`](Self::find_triead).
    pub(crate) fn find_nexus(
        &self,
        caller: &str,
        tname: &str,
        nexname: &str,
        immediate: bool,
    ) -> Result<Arc<Nexus>> {
        let triead = self.find_triead(caller, tname, immediate)?;
        triead
            .nexus(nexname)
            .ok_or_else(|| TriesteError::not_found("nexus", format!("{}/{}", tname, nexname)))
    }

    /// Mark the thread as having all its nexuses exported
    pub(crate) fn mark_constructed(&self, triead: &Triead) -> Result<()> {
        let st = self.lock();
        self.check_aborted(&st)?;
        self.mark_constructed_l(triead);
        Ok(())
    }

    fn mark_constructed_l(&self, triead: &Triead) {
        if !triead.is_constructed() {
            triead.set_constructed();
            log::debug!("app '{}': thread '{}' constructed", self.name, triead.name());
            self.notify();
        }
    }

    /// Mark the thread as having all its connections made. The last thread
    /// to become ready runs the topology check; a loop aborts the app.
    pub(crate) fn mark_ready(&self, triead: &Triead) -> Result<()> {
        let mut st = self.lock();
        self.check_aborted(&st)?;
        self.mark_ready_l(&mut st, triead)
    }

    fn mark_ready_l(&self, st: &mut AppState, triead: &Triead) -> Result<()> {
        self.mark_constructed_l(triead);
        if triead.is_ready() {
            return Ok(());
        }
        triead.set_ready();
        st.unready -= 1;
        log::debug!("app '{}': thread '{}' ready", self.name, triead.name());
        self.notify();
        if st.unready == 0 && !st.ready_fired {
            st.ready_fired = true;
            if st.aborted.is_some() {
                return Ok(());
            }
            if let Err(e) = topology::check_loops(&self.name, &st.trieads()) {
                log::error!("{}", e);
                self.abort_l(st, triead.name(), &e.to_string());
                return Err(e);
            }
            log::info!("app '{}': all threads ready", self.name);
        }
        Ok(())
    }

    /// Mark the thread dead; implies constructed and ready. Never fails: a
    /// loop found on the way is logged and the app aborted.
    pub(crate) fn mark_dead(&self, triead: &Triead) {
        let mut st = self.lock();
        if let Err(e) = self.mark_ready_l(&mut st, triead) {
            log::error!(
                "app '{}': thread '{}' exiting: {}",
                self.name,
                triead.name(),
                e
            );
        }
        if triead.is_dead() {
            return;
        }
        triead.set_dead();
        st.alive -= 1;
        let join = st
            .threads
            .get_mut(triead.name())
            .and_then(|r| r.join.take());
        if let Some(join) = join {
            st.zombies.push(Zombie {
                name: triead.name().to_string(),
                join,
            });
        }
        st.need_harvest = true;
        log::debug!("app '{}': thread '{}' dead", self.name, triead.name());
        drop(st);
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn app(name: &str) -> Arc<App> {
        Arc::new(App::new(name, AppConfig::new().with_timeout_secs(5)))
    }

    #[test]
    fn test_declare_idempotent() {
        let app = app("t_declare");
        app.declare_triead("t1").unwrap();
        app.declare_triead("t1").unwrap();
        assert_eq!(app.threads().len(), 1);
        assert!(!app.is_ready());
        assert_eq!(app.triead_state("t1"), Some(TrieadState::Declared));
    }

    #[test]
    fn test_make_duplicate() {
        let app = app("t_dup");
        let _t1 = app.make_triead("t1").unwrap();
        assert!(matches!(
            app.make_triead("t1"),
            Err(TriesteError::DuplicateName { .. })
        ));
        assert!(matches!(
            app.make_triead(""),
            Err(TriesteError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_deadline_fixed_after_declare() {
        let app = app("t_deadline");
        app.set_timeout(1).unwrap();
        app.declare_triead("t1").unwrap();
        assert!(matches!(
            app.set_timeout(10),
            Err(TriesteError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_ready_and_dead() {
        let app = app("t_ready");
        let t1 = app.make_triead("t1").unwrap();
        let t2 = app.make_triead("t2").unwrap();
        t1.mark_ready().unwrap();
        assert!(!app.is_ready());
        t2.mark_ready().unwrap();
        assert!(app.is_ready());
        app.wait_ready().unwrap();

        drop(t1);
        assert!(!app.is_dead());
        drop(t2);
        assert!(app.is_dead());
        app.wait_dead();
    }

    #[test]
    fn test_no_threads_after_ready() {
        let app = app("t_late");
        let t1 = app.make_triead("t1").unwrap();
        t1.mark_ready().unwrap();
        assert!(matches!(
            app.declare_triead("t2"),
            Err(TriesteError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_first_abort_wins() {
        let app = app("t_abort");
        app.declare_triead("t1").unwrap();
        app.abort("t2", "first");
        app.abort("t3", "second");
        assert_eq!(app.aborted_by().as_deref(), Some("t2"));
        assert_eq!(app.aborted_msg().as_deref(), Some("first"));
        assert!(app.is_ready());
        // the declared thread is no longer waited for
        assert!(app.is_dead());
        assert!(matches!(
            app.make_triead("t1"),
            Err(TriesteError::Aborted { .. })
        ));
    }

    #[test]
    fn test_immediate_lookup() {
        let app = app("t_immediate");
        let t1 = app.make_triead("t1").unwrap();
        app.declare_triead("t2").unwrap();
        let start = Instant::now();
        assert!(matches!(
            t1.find_triead("t2", true),
            Err(TriesteError::NotFound { .. })
        ));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(matches!(
            t1.find_triead("t9", false),
            Err(TriesteError::NotFound { .. })
        ));
        // self lookup never waits
        assert_eq!(t1.find_triead("t1", false).unwrap().name(), "t1");
    }

    #[test]
    fn test_lookup_waits_for_construction() {
        let app = app("t_wait");
        let t1 = app.make_triead("t1").unwrap();
        let t2 = app.make_triead("t2").unwrap();
        let waiter = thread::spawn(move || t1.find_triead("t2", false).map(|t| t.name().to_string()));
        while app.sleepers("t2") == 0 {
            thread::yield_now();
        }
        t2.mark_constructed().unwrap();
        assert_eq!(waiter.join().unwrap().unwrap(), "t2");
        assert_eq!(app.sleepers("t2"), 0);
    }

    #[test]
    fn test_deadlock_detected() {
        let app = app("t_deadlock");
        let t1 = app.make_triead("t1").unwrap();
        let t2 = app.make_triead("t2").unwrap();
        let waiter = thread::spawn(move || {
            let r = t1.find_triead("t2", false);
            (t1, r)
        });
        while app.sleepers("t2") == 0 {
            thread::yield_now();
        }
        match t2.find_triead("t1", false) {
            Err(TriesteError::Deadlock { chain, .. }) => assert_eq!(chain, "t2 -> t1 -> t2"),
            other => panic!("unexpected {:?}", other.map(|t| t.name().to_string())),
        }
        t2.mark_constructed().unwrap();
        let (_t1, r) = waiter.join().unwrap();
        assert!(r.is_ok());
    }

    #[test]
    fn test_lookup_timeout() {
        let app = app("t_timeout");
        app.set_deadline(Instant::now() + Duration::from_millis(100))
            .unwrap();
        let t1 = app.make_triead("t1").unwrap();
        app.declare_triead("t2").unwrap();
        assert!(matches!(
            t1.find_triead("t2", false),
            Err(TriesteError::Timeout { .. })
        ));
        match app.wait_ready() {
            Err(TriesteError::Timeout { caller, .. }) => assert_eq!(caller, "t_timeout"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ready_waiters_register_quietly() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let app = app("t_quiet_waiters");
        let owners: Vec<_> = ["t1", "t2", "t3"]
            .iter()
            .map(|n| app.make_triead(n).unwrap())
            .collect();
        let wakeups = Arc::new(AtomicUsize::new(0));
        let watcher = {
            let app = app.clone();
            let wakeups = wakeups.clone();
            thread::spawn(move || {
                let st = app.lock();
                let _ = app.wait_until(st, None, |s| {
                    wakeups.fetch_add(1, Ordering::SeqCst);
                    s.aborted.is_some()
                });
            })
        };
        while wakeups.load(Ordering::SeqCst) == 0 {
            thread::yield_now();
        }

        let waiters: Vec<_> = ["t1", "t2", "t3"]
            .iter()
            .map(|&n| {
                let app = app.clone();
                thread::spawn(move || app.wait_ready_as(n))
            })
            .collect();
        while app.ready_waiters() < 3 {
            thread::yield_now();
        }
        assert_eq!(wakeups.load(Ordering::SeqCst), 1);

        app.abort("main", "stop");
        for h in waiters {
            assert!(matches!(h.join().unwrap(), Err(TriesteError::Aborted { .. })));
        }
        watcher.join().unwrap();
        assert!(wakeups.load(Ordering::SeqCst) >= 2);
        drop(owners);
    }

    #[test]
    fn test_define_join_after_death() {
        let app = app("t_late_join");
        let t1 = app.make_triead("t1").unwrap();
        drop(t1);
        app.define_join("t1", thread::spawn(|| ())).unwrap();
        assert!(app.lock().need_harvest);
        assert_eq!(app.lock().zombies.len(), 1);
    }
}
