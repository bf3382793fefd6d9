pub mod image_file;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use synth_graph::abstract_scinth_def::AbstractScinthDef;
use synth_graph::archetypes::Archetypes;

/// The consumer of work the scheduler finishes on behalf of the render
/// service: admitted defs get their GPU objects built, decoded images get
/// staged for transfer.
pub trait DefReceiver: Send + Sync {
    /// Build the GPU-resident ScinthDef for an admitted abstract def,
    /// returning false when compilation fails and the def should not count.
    fn build_scinth_def(&self, abstract_scinth_def: Arc<AbstractScinthDef>) -> bool;

    /// Hand decoded RGBA bytes over for staging; `completion` fires once the
    /// image is resident and installed in the image map.
    fn stage_decoded_image(
        &self,
        image_id: i32,
        width: u32,
        height: u32,
        bytes: Vec<u8>,
        completion: Box<dyn FnOnce() + Send>,
    );
}

/// A unit of work for the pool, or a sync/completion continuation.
pub type Job = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct JobQueue {
    jobs: VecDeque<Job>,
    active_workers: usize,
}

struct Shared {
    quit: AtomicBool,

    // Guards the job queue and the active worker count.
    queue: Mutex<JobQueue>,
    queue_condition: Condvar,
    idle_condition: Condvar,

    sync_callbacks: Mutex<VecDeque<Job>>,
    sync_condition: Condvar,
}

/// Maintains a pool of worker threads executing submitted jobs, plus a sync
/// watcher thread servicing barrier continuations.
///
/// The ordering guarantee: a continuation passed to [`Async::sync`] runs
/// only after every job submitted before it has returned and the queue has
/// drained. Jobs submitted concurrently with the sync may or may not precede
/// it.
pub struct Async {
    archetypes: Arc<Archetypes>,
    receiver: Arc<dyn DefReceiver>,
    shared: Arc<Shared>,
    worker_threads: Vec<JoinHandle<()>>,
    sync_thread: Option<JoinHandle<()>>,
}

impl Async {
    pub fn new(archetypes: Arc<Archetypes>, receiver: Arc<dyn DefReceiver>) -> Async {
        Async {
            archetypes,
            receiver,
            shared: Arc::new(Shared {
                quit: AtomicBool::new(false),
                queue: Mutex::new(JobQueue::default()),
                queue_condition: Condvar::new(),
                idle_condition: Condvar::new(),
                sync_callbacks: Mutex::new(VecDeque::new()),
                sync_condition: Condvar::new(),
            }),
            worker_threads: Vec::new(),
            sync_thread: None,
        }
    }

    /// Nonblocking. Starts the worker threads and the sync thread.
    pub fn run(&mut self, number_of_worker_threads: usize) {
        let workers = number_of_worker_threads.max(1);
        info!("Async starting {workers} worker threads");
        for i in 0..workers {
            let shared = self.shared.clone();
            let name = format!("async_{i}");
            self.worker_threads.push(
                std::thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || Self::worker_thread_main(&shared, &name))
                    .expect("spawning scheduler worker thread"),
            );
        }
        let shared = self.shared.clone();
        self.sync_thread = Some(
            std::thread::Builder::new()
                .name("async_sync".to_string())
                .spawn(move || Self::sync_thread_main(&shared))
                .expect("spawning scheduler sync thread"),
        );
    }

    /// Queue `callback` to run the next time all workers are idle and the
    /// job queue is empty.
    pub fn sync(&self, callback: Job) {
        self.shared.sync_callbacks.lock().push_back(callback);
        self.shared.sync_condition.notify_one();
    }

    /// Signals all threads to exit, dropping any jobs left in the queue.
    pub fn stop(&mut self) {
        if !self.shared.quit.swap(true, Ordering::SeqCst) {
            self.shared.queue_condition.notify_all();
            self.shared.sync_condition.notify_all();
            self.shared.idle_condition.notify_all();
            for thread in self.worker_threads.drain(..) {
                let _ = thread.join();
            }
            if let Some(thread) = self.sync_thread.take() {
                let _ = thread.join();
            }
            debug!(
                "Async terminated with {} jobs left in queue",
                self.shared.queue.lock().jobs.len()
            );
        }
    }

    fn enqueue(&self, job: Job) {
        self.shared.queue.lock().jobs.push_back(job);
        self.shared.queue_condition.notify_one();
    }

    /// Async load all VGen yaml files at `path`; the completion receives the
    /// number of valid VGens loaded, or a negative value on error.
    pub fn vgen_load_directory(
        &self,
        path: PathBuf,
        completion: impl FnOnce(i32) + Send + 'static,
    ) {
        let archetypes = self.archetypes.clone();
        self.enqueue(Box::new(move || {
            if !path.is_dir() {
                error!("nonexistent or not directory path {path:?} for VGens");
                completion(-1);
                return;
            }
            debug!("parsing yaml files in {path:?} for AbstractVGens");
            let mut parse_count = 0;
            for entry in yaml_files(&path) {
                debug!("parsing AbstractVGen yaml file {entry:?}");
                parse_count += archetypes.load_abstract_vgens_from_file(&entry);
            }
            debug!("parsed {parse_count} unique VGens");
            completion(parse_count);
        }));
    }

    /// Async load all ScinthDef yaml files at `path`; the completion
    /// receives the number of defs admitted and built.
    pub fn scinth_def_load_directory(
        &self,
        path: PathBuf,
        completion: impl FnOnce(i32) + Send + 'static,
    ) {
        let archetypes = self.archetypes.clone();
        let receiver = self.receiver.clone();
        self.enqueue(Box::new(move || {
            if !path.is_dir() {
                error!("nonexistent or not directory path {path:?} for ScinthDefs");
                completion(-1);
                return;
            }
            let mut parse_count = 0;
            for entry in yaml_files(&path) {
                debug!("parsing ScinthDef yaml file {entry:?}");
                for scinth_def in archetypes.load_from_file(&entry) {
                    if receiver.build_scinth_def(scinth_def) {
                        parse_count += 1;
                    }
                }
            }
            debug!("parsed {parse_count} unique ScinthDefs from directory {path:?}");
            completion(parse_count);
        }));
    }

    pub fn scinth_def_load_file(
        &self,
        path: PathBuf,
        completion: impl FnOnce(i32) + Send + 'static,
    ) {
        let archetypes = self.archetypes.clone();
        let receiver = self.receiver.clone();
        self.enqueue(Box::new(move || {
            if !path.is_file() {
                error!("nonexistent or nonfile path {path:?} for ScinthDefs");
                completion(-1);
                return;
            }
            let mut parse_count = 0;
            for scinth_def in archetypes.load_from_file(&path) {
                if receiver.build_scinth_def(scinth_def) {
                    parse_count += 1;
                }
            }
            debug!("parsed {parse_count} unique ScinthDefs from file {path:?}");
            completion(parse_count);
        }));
    }

    pub fn scinth_def_parse_string(
        &self,
        yaml: String,
        completion: impl FnOnce(i32) + Send + 'static,
    ) {
        let archetypes = self.archetypes.clone();
        let receiver = self.receiver.clone();
        self.enqueue(Box::new(move || {
            let mut parse_count = 0;
            for scinth_def in archetypes.parse_from_string(&yaml) {
                if receiver.build_scinth_def(scinth_def) {
                    parse_count += 1;
                }
            }
            completion(parse_count);
        }));
    }

    /// Puts one of the worker threads to sleep. Useful for testing.
    pub fn sleep_for(&self, seconds: u64, completion: Job) {
        self.enqueue(Box::new(move || {
            info!("worker thread sleeping for {seconds} seconds");
            std::thread::sleep(std::time::Duration::from_secs(seconds));
            completion();
        }));
    }

    /// Async decode an image file into a new RGBA buffer and stage it under
    /// `image_id`. Width or height of -1 derive from the source dimensions,
    /// preserving aspect when only one is provided.
    pub fn read_image_into_buffer(
        &self,
        image_id: i32,
        file_path: PathBuf,
        width: i32,
        height: i32,
        completion: Box<dyn FnOnce() + Send>,
    ) {
        let receiver = self.receiver.clone();
        self.enqueue(Box::new(move || {
            match image_file::decode_and_resize(&file_path, width, height) {
                Ok(decoded) => {
                    info!(
                        "decoded image at {file_path:?} to {}x{} for image {image_id}",
                        decoded.width, decoded.height
                    );
                    receiver.stage_decoded_image(
                        image_id,
                        decoded.width,
                        decoded.height,
                        decoded.bytes,
                        completion,
                    );
                }
                Err(err) => {
                    error!("failed to decode image at {file_path:?}: {err}");
                    completion();
                }
            }
        }));
    }

    fn worker_thread_main(shared: &Shared, thread_name: &str) {
        debug!("Async worker {thread_name} starting up");

        while !shared.quit.load(Ordering::SeqCst) {
            let mut work: Option<Job> = None;
            {
                let mut queue = shared.queue.lock();
                shared.queue_condition.wait_while(&mut queue, |queue| {
                    !shared.quit.load(Ordering::SeqCst) && queue.jobs.is_empty()
                });
                if shared.quit.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(job) = queue.jobs.pop_front() {
                    queue.active_workers += 1;
                    work = Some(job);
                }
            }

            // Keep pulling work without sleeping until the queue runs dry or
            // we get a termination signal.
            while !shared.quit.load(Ordering::SeqCst) {
                match work.take() {
                    Some(job) => job(),
                    None => break,
                }
                let mut queue = shared.queue.lock();
                if let Some(job) = queue.jobs.pop_front() {
                    work = Some(job);
                } else {
                    queue.active_workers -= 1;
                }
            }

            // About to go dormant, ping the idle condition in case we were
            // the last worker to finish.
            shared.idle_condition.notify_one();
        }

        debug!("Async worker {thread_name} got termination signal, exiting");
    }

    fn sync_thread_main(shared: &Shared) {
        debug!("Async sync watcher thread starting");

        while !shared.quit.load(Ordering::SeqCst) {
            // First wait for a sync to be requested.
            {
                let mut callbacks = shared.sync_callbacks.lock();
                shared.sync_condition.wait_while(&mut callbacks, |callbacks| {
                    !shared.quit.load(Ordering::SeqCst) && callbacks.is_empty()
                });
                if shared.quit.load(Ordering::SeqCst) {
                    break;
                }
                if callbacks.is_empty() {
                    continue;
                }
            }

            debug!("Async has sync callback, waiting for idle workers");

            // Then wait for the queue to empty and all workers to go idle.
            {
                let mut queue = shared.queue.lock();
                shared.idle_condition.wait_while(&mut queue, |queue| {
                    !shared.quit.load(Ordering::SeqCst)
                        && !(queue.jobs.is_empty() && queue.active_workers == 0)
                });
                if shared.quit.load(Ordering::SeqCst) {
                    break;
                }
                if !queue.jobs.is_empty() || queue.active_workers > 0 {
                    continue;
                }
            }

            debug!("Async sync watcher idle, firing callbacks");

            loop {
                let callback = shared.sync_callbacks.lock().pop_front();
                match callback {
                    Some(callback) => callback(),
                    None => break,
                }
            }
        }

        debug!("Async sync watcher thread exiting");
    }
}

impl Drop for Async {
    fn drop(&mut self) {
        self.stop();
    }
}

fn yaml_files(path: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            error!("failed to read directory {path:?}: {err}");
            return files;
        }
    };
    for entry in entries.flatten() {
        let entry_path = entry.path();
        if entry_path.is_file() && entry_path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(entry_path);
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct CountingReceiver {
        defs_built: AtomicUsize,
    }

    impl DefReceiver for CountingReceiver {
        fn build_scinth_def(&self, _abstract_scinth_def: Arc<AbstractScinthDef>) -> bool {
            self.defs_built.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn stage_decoded_image(
            &self,
            _image_id: i32,
            _width: u32,
            _height: u32,
            _bytes: Vec<u8>,
            completion: Box<dyn FnOnce() + Send>,
        ) {
            completion();
        }
    }

    fn test_async(workers: usize) -> (Async, Arc<CountingReceiver>) {
        let archetypes = Arc::new(Archetypes::new());
        let receiver = Arc::new(CountingReceiver::default());
        let mut scheduler = Async::new(archetypes, receiver.clone());
        scheduler.run(workers);
        (scheduler, receiver)
    }

    fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn sync_runs_after_all_prior_jobs() {
        let (scheduler, _) = test_async(2);
        let completed = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let completed = completed.clone();
            scheduler.enqueue(Box::new(move || {
                std::thread::sleep(Duration::from_millis(100));
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let completed = completed.clone();
            let observed = observed.clone();
            scheduler.sync(Box::new(move || {
                observed.store(completed.load(Ordering::SeqCst), Ordering::SeqCst);
            }));
        }
        assert!(wait_for(
            || observed.load(Ordering::SeqCst) != usize::MAX,
            Duration::from_secs(5)
        ));
        assert_eq!(3, observed.load(Ordering::SeqCst));
    }

    #[test]
    fn sync_with_single_worker_serializes_jobs() {
        let (scheduler, _) = test_async(1);
        let start = Instant::now();
        for _ in 0..3 {
            scheduler.enqueue(Box::new(|| {
                std::thread::sleep(Duration::from_millis(100));
            }));
        }
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            scheduler.sync(Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_for(
            || fired.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        ));
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn multiple_syncs_fire_in_order() {
        let (scheduler, _) = test_async(2);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            scheduler.sync(Box::new(move || {
                order.lock().push(i);
            }));
        }
        assert!(wait_for(|| order.lock().len() == 3, Duration::from_secs(5)));
        assert_eq!(vec![0, 1, 2], *order.lock());
    }

    #[test]
    fn stop_terminates_with_queued_work() {
        let (mut scheduler, _) = test_async(2);
        for _ in 0..32 {
            scheduler.enqueue(Box::new(|| {
                std::thread::sleep(Duration::from_millis(50));
            }));
        }
        let start = Instant::now();
        scheduler.stop();
        // Workers finish their in-flight job and exit without draining the
        // remaining queue.
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn parse_string_reports_admitted_defs() {
        let (scheduler, receiver) = test_async(2);
        scheduler.archetypes.parse_abstract_vgens_from_string(
            r#"
name: FragOut
rates: [ pixel ]
inputs: [ a ]
outputs: [ out ]
dimensions:
    - inputs: 1
      outputs: 4
shader: "@out = vec4(@a, @a, @a, 1.0);"
"#,
        );
        let count = Arc::new(AtomicUsize::new(usize::MAX));
        {
            let count = count.clone();
            scheduler.scinth_def_parse_string(
                r#"
name: simple
vgens:
    - className: FragOut
      inputs:
          - type: constant
            dimension: 1
            value: 1.0
      outputs:
          - dimension: 4
"#
                .to_string(),
                move |admitted| {
                    count.store(admitted as usize, Ordering::SeqCst);
                },
            );
        }
        assert!(wait_for(
            || count.load(Ordering::SeqCst) != usize::MAX,
            Duration::from_secs(5)
        ));
        assert_eq!(1, count.load(Ordering::SeqCst));
        assert_eq!(1, receiver.defs_built.load(Ordering::SeqCst));
    }

    #[test]
    fn sleep_for_invokes_completion() {
        let (scheduler, _) = test_async(1);
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            scheduler.sleep_for(
                0,
                Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert!(wait_for(
            || fired.load(Ordering::SeqCst) == 1,
            Duration::from_secs(5)
        ));
    }
}
