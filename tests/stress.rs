use lrcc::{
    readindicator::{AtomicCounter, CounterArray, EntryPerThread, IngressEgress, StaticPerThread},
    Config, LeftRight, LeftRightAL, LeftRightALNV, LeftRightFlatCombining, Mutation,
};
use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Append(u64);

impl Mutation<Vec<u64>> for Append {
    type Output = usize;
    fn apply(&self, log: &mut Vec<u64>) -> usize {
        log.push(self.0);
        log.len()
    }
}

/// The operations the tests need from every variant. Slots are registered
/// per call, which is slower but keeps the tests variant agnostic.
trait Log: Send + Sync + 'static {
    fn view<R>(&self, query: impl FnOnce(&Vec<u64>) -> R) -> R;
    fn append(&self, x: u64) -> usize;
    fn copies(self) -> (Vec<u64>, Vec<u64>);
}

impl<RI: lrcc::readindicator::ReadIndicator + 'static> Log for LeftRight<Vec<u64>, RI> {
    fn view<R>(&self, query: impl FnOnce(&Vec<u64>) -> R) -> R {
        let slot = self.register().expect("free slot");
        self.read(&slot, query)
    }
    fn append(&self, x: u64) -> usize {
        self.mutate(&Append(x))
    }
    fn copies(self) -> (Vec<u64>, Vec<u64>) {
        self.into_inner()
    }
}

impl Log for LeftRightAL<Vec<u64>> {
    fn view<R>(&self, query: impl FnOnce(&Vec<u64>) -> R) -> R {
        self.read(query)
    }
    fn append(&self, x: u64) -> usize {
        self.mutate(&Append(x))
    }
    fn copies(self) -> (Vec<u64>, Vec<u64>) {
        self.into_inner()
    }
}

impl Log for LeftRightALNV<Vec<u64>> {
    fn view<R>(&self, query: impl FnOnce(&Vec<u64>) -> R) -> R {
        self.read(query)
    }
    fn append(&self, x: u64) -> usize {
        self.mutate(&Append(x))
    }
    fn copies(self) -> (Vec<u64>, Vec<u64>) {
        self.into_inner()
    }
}

impl Log for LeftRightFlatCombining<Vec<u64>, Append> {
    fn view<R>(&self, query: impl FnOnce(&Vec<u64>) -> R) -> R {
        let slot = self.register().expect("free slot");
        self.read(&slot, query)
    }
    fn append(&self, x: u64) -> usize {
        let slot = self.register().expect("free slot");
        self.mutate(&slot, &Append(x))
    }
    fn copies(self) -> (Vec<u64>, Vec<u64>) {
        self.into_inner()
    }
}

fn config() -> Config {
    Config {
        max_threads: 32,
        counter_buckets: 8,
        ..Config::default()
    }
}

// Every state a reader observes must be a prefix of the final log, and
// later reads of the same reader never observe a shorter prefix.
fn appends_are_linearizable<L: Log>(log: L) {
    const N_WRITERS: u64 = 3;
    const N_READERS: usize = 3;
    const WORK: u64 = 400;
    init_tracing();
    let log = Arc::new(log);
    let stop = Arc::new(AtomicBool::new(false));
    let readers = (0..N_READERS)
        .map(|_| {
            let log = log.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                let mut last_len = 0;
                while !stop.load(Ordering::Acquire) {
                    let (len, last) = log.view(|v| (v.len(), v.last().copied()));
                    assert!(len >= last_len);
                    if len > last_len {
                        if let Some(last) = last {
                            seen.push((len, last));
                        }
                    }
                    last_len = len;
                }
                seen
            })
        })
        .collect::<Vec<_>>();
    let writers = (0..N_WRITERS)
        .map(|id| {
            let log = log.clone();
            std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for n in 0..WORK {
                    let len = log.append(id * WORK + n);
                    assert!(len as u64 <= N_WRITERS * WORK);
                    if rng.gen_ratio(1, 50) {
                        std::thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    writers.into_iter().for_each(|th| th.join().unwrap());
    stop.store(true, Ordering::Release);
    let seen = readers
        .into_iter()
        .flat_map(|th| th.join().unwrap())
        .collect::<Vec<_>>();

    let log = Arc::try_unwrap(log).unwrap_or_else(|_| panic!("log still shared"));
    let (left, right) = log.copies();
    assert_eq!(left, right);
    assert_eq!(left.len() as u64, N_WRITERS * WORK);
    for (len, last) in seen {
        assert_eq!(left[len - 1], last);
    }
}

#[test]
fn classic_appends_are_linearizable() -> anyhow::Result<()> {
    let config = config();
    appends_are_linearizable(LeftRight::<Vec<u64>, AtomicCounter>::with_config(vec![], &config)?);
    appends_are_linearizable(LeftRight::<Vec<u64>, IngressEgress>::with_config(vec![], &config)?);
    appends_are_linearizable(LeftRight::<Vec<u64>, CounterArray>::with_config(vec![], &config)?);
    appends_are_linearizable(LeftRight::<Vec<u64>, StaticPerThread>::with_config(vec![], &config)?);
    appends_are_linearizable(LeftRight::<Vec<u64>, EntryPerThread>::with_config(vec![], &config)?);
    Ok(())
}

#[test]
fn packed_appends_are_linearizable() -> anyhow::Result<()> {
    let config = config();
    appends_are_linearizable(LeftRightAL::with_config(Vec::<u64>::new(), &config)?);
    appends_are_linearizable(LeftRightALNV::with_config(Vec::<u64>::new(), &config)?);
    Ok(())
}

#[test]
fn combining_appends_are_linearizable() -> anyhow::Result<()> {
    let log: LeftRightFlatCombining<Vec<u64>, Append> =
        LeftRightFlatCombining::with_config(vec![], &config())?;
    appends_are_linearizable(log);
    Ok(())
}

fn empty_list_then_one<L: Log>(log: L) {
    assert_eq!(log.view(|v| v.clone()), Vec::<u64>::new());
    assert_eq!(log.append(1), 1);
    assert_eq!(log.view(|v| v.clone()), vec![1]);
    assert_eq!(log.copies(), (vec![1], vec![1]));
}

#[test]
fn append_to_empty_list_every_variant() {
    empty_list_then_one(LeftRight::<Vec<u64>, AtomicCounter>::new(vec![]));
    empty_list_then_one(LeftRight::<Vec<u64>, EntryPerThread>::new(vec![]));
    empty_list_then_one(LeftRightAL::new(Vec::<u64>::new()));
    empty_list_then_one(LeftRightALNV::new(Vec::<u64>::new()));
    let combining: LeftRightFlatCombining<Vec<u64>, Append> = LeftRightFlatCombining::new(vec![]);
    empty_list_then_one(combining);
}

#[test]
fn reads_complete_while_writers_are_locked_out() {
    const READS: usize = 10_000;
    let classic = Arc::new(LeftRight::<Vec<u64>, StaticPerThread>::new(vec![7]));
    let al = Arc::new(LeftRightAL::new(vec![7u64]));
    let alnv = Arc::new(LeftRightALNV::new(vec![7u64]));

    let _classic_guard = classic.writers_lock();
    let _al_guard = al.writers_lock();
    let _alnv_guard = alnv.writers_lock();
    let reader = std::thread::spawn({
        let (classic, al, alnv) = (classic.clone(), al.clone(), alnv.clone());
        move || {
            let slot = classic.register().unwrap();
            for _ in 0..READS {
                assert_eq!(classic.read(&slot, |v| v[0]), 7);
                assert_eq!(al.read(|v| v[0]), 7);
                assert_eq!(alnv.read(|v| v[0]), 7);
            }
        }
    });
    // Joining while every writer lock is held proves reads never took them
    reader.join().unwrap();
}

struct Slow;

impl Mutation<u64> for Slow {
    type Output = ();
    fn apply(&self, v: &mut u64) {
        std::thread::sleep(Duration::from_millis(200));
        *v += 1;
    }
}

#[test]
fn reads_complete_while_combiner_is_busy() {
    let lr: Arc<LeftRightFlatCombining<u64, Slow>> = Arc::new(LeftRightFlatCombining::new(0));
    let writer = std::thread::spawn({
        let lr = lr.clone();
        move || {
            let slot = lr.register().unwrap();
            lr.mutate(&slot, &Slow)
        }
    });
    let slot = lr.register().unwrap();
    let mut reads = 0;
    while !writer.is_finished() {
        let v = lr.read(&slot, |v| *v);
        assert!(v <= 1);
        reads += 1;
    }
    writer.join().unwrap();
    assert!(reads > 1);
    assert_eq!(lr.read(&slot, |v| *v), 1);
}

#[test]
fn config_file_drives_construction() -> anyhow::Result<()> {
    let config = Config::from_toml(
        r#"
        max_threads = 4
        counter_buckets = 2
        wait = "spin"
        "#,
    )?;
    let lr = LeftRight::<u64, StaticPerThread>::with_config(0, &config)?;
    let slots = (0..4).map(|_| lr.register()).collect::<Result<Vec<_>, _>>()?;
    assert!(lr.register().is_err());
    lr.mutate(&|v: &mut u64| *v = 5);
    assert_eq!(lr.read(&slots[0], |v| *v), 5);
    Ok(())
}
