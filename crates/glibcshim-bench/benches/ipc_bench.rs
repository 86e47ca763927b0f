//! Emulated IPC benchmarks.
//!
//! Round trips through the in-process tables, and the same round trip
//! through the C-ABI wrappers to show the translation overhead.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use glibcshim_abi::mqueue_abi::{self, GlibcMqAttr};
use glibcshim_core::ipc::mqueue::{O_CREAT, O_NONBLOCK, O_RDWR};
use glibcshim_core::ipc::{IPC_CREAT, IPC_PRIVATE, IpcLimits, MqAttr, MqTable, MsgTable, SemOp, SemTable};

fn bench_mq_round_trip(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 256, 4096];
    let mut group = c.benchmark_group("mq_round_trip");

    let table = MqTable::new(IpcLimits::default());
    let attr = MqAttr {
        flags: 0,
        maxmsg: 8,
        msgsize: 4096,
        curmsgs: 0,
    };
    let Ok(mqd) = table.open("/bench-core", O_CREAT | O_RDWR | O_NONBLOCK, Some(attr)) else {
        return;
    };

    let c_attr = GlibcMqAttr {
        mq_maxmsg: 8,
        mq_msgsize: 4096,
        ..GlibcMqAttr::default()
    };
    // SAFETY: valid name and attribute pointers.
    let c_mqd = unsafe {
        mqueue_abi::mq_open(c"/bench-abi".as_ptr(), O_CREAT | O_RDWR | O_NONBLOCK, 0o600, &c_attr)
    };

    for &size in sizes {
        let msg = vec![0x5Au8; size];
        let mut buf = vec![0u8; 4096];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("table", size), &size, |b, _| {
            b.iter(|| {
                let _ = table.send(mqd, black_box(&msg), 1, None);
                black_box(table.receive(mqd, &mut buf, None).ok());
            });
        });

        if c_mqd >= 0 {
            group.bench_with_input(BenchmarkId::new("wrapper", size), &size, |b, _| {
                b.iter(|| unsafe {
                    mqueue_abi::mq_send(c_mqd, msg.as_ptr().cast(), msg.len(), 1);
                    black_box(mqueue_abi::mq_receive(
                        c_mqd,
                        buf.as_mut_ptr().cast(),
                        buf.len(),
                        std::ptr::null_mut(),
                    ));
                });
            });
        }
    }
    group.finish();
}

fn bench_sem_op(c: &mut Criterion) {
    let table = SemTable::new(IpcLimits::default());
    let Ok(id) = table.get(IPC_PRIVATE, 4, IPC_CREAT | 0o600) else {
        return;
    };
    let post = [SemOp::new(0, 1)];
    let wait = [SemOp::new(0, -1)];
    let multi_post = [SemOp::new(0, 1), SemOp::new(1, 1), SemOp::new(2, 1), SemOp::new(3, 1)];
    let multi_wait = [SemOp::new(0, -1), SemOp::new(1, -1), SemOp::new(2, -1), SemOp::new(3, -1)];
    let pid = std::process::id() as i32;

    let mut group = c.benchmark_group("semop");
    group.bench_function("post_wait", |b| {
        b.iter(|| {
            let _ = table.op(id, black_box(&post), pid, None);
            black_box(table.op(id, &wait, pid, None).is_ok());
        });
    });
    group.bench_function("post_wait_4", |b| {
        b.iter(|| {
            let _ = table.op(id, black_box(&multi_post), pid, None);
            black_box(table.op(id, &multi_wait, pid, None).is_ok());
        });
    });
    group.finish();
}

fn bench_msg_by_type(c: &mut Criterion) {
    let table = MsgTable::new(IpcLimits::default());
    let Ok(id) = table.get(IPC_PRIVATE, IPC_CREAT | 0o600) else {
        return;
    };
    let payload = [7u8; 64];
    let mut buf = [0u8; 64];

    let mut group = c.benchmark_group("msg_round_trip");
    for &msgtyp in &[0i64, 3, -3] {
        group.bench_with_input(BenchmarkId::new("msgtyp", msgtyp), &msgtyp, |b, &t| {
            b.iter(|| {
                let _ = table.send(id, 1, &payload, 0);
                let _ = table.send(id, 3, &payload, 0);
                black_box(table.receive(id, &mut buf, t, 0).ok());
                black_box(table.receive(id, &mut buf, 0, 0).ok());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mq_round_trip, bench_sem_op, bench_msg_by_type);
criterion_main!(benches);
