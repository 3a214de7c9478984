use super::*;

use anyhow::bail;

fn incr(argument: Value, _io: &Interop) -> anyhow::Result<Value> {
    Ok(int(as_int(&argument) + 1))
}

fn double(argument: Value, _io: &Interop) -> anyhow::Result<Value> {
    Ok(int(as_int(&argument) * 2))
}

fn failing(_argument: Value, _io: &Interop) -> anyhow::Result<Value> {
    bail!("flow failure")
}

/// Two independent flows in the first stage, one joining flow in the second.
fn staged(name: &str) -> FunctionSeed {
    function(
        name,
        vec![native("incr", incr), native("double", double)],
        BranchSeed {
            instrs: vec![
                Instr::call(Addr::Static(0), Addr::Arg),
                Instr::call(Addr::Static(0), Addr::Frame(0)),
                Instr::call(Addr::Static(1), Addr::Arg),
                Instr::call(Addr::Static(1), Addr::Frame(2)),
                Instr::size(2),
                Instr::mov(Addr::Frame(1)),
                Instr::mov(Addr::Frame(3)),
                Instr::tuple(Addr::Frame(4)),
            ],
            stages: Some(vec![
                StageSeed {
                    flows: vec![FlowSeed::new(0, 2), FlowSeed::new(2, 4)],
                },
                StageSeed {
                    flows: vec![FlowSeed::new(4, 8)],
                },
            ]),
            ..BranchSeed::default()
        },
    )
}

fn parallel_machine() -> Machine {
    Machine::new().with_pool(Arc::new(WorkerPool::new(4, 16)))
}

#[test]
fn test_staged_execution_sequential() {
    let program = link_one(staged("staged_seq"));
    let result = run(&program, 0, int(10)).unwrap();
    assert_eq!(result, Value::tuple(vec![int(12), int(40)]));
}

#[test]
fn test_parallel_and_sequential_agree() {
    let program = link_one(staged("staged_par"));
    let sequential = run(&program, 0, int(10)).unwrap();
    let parallel = parallel_machine().call(&program.function(0), int(10)).unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn test_flow_failure_stops_the_stage() {
    let program = link_one(function(
        "broken_stage",
        vec![native("failing", failing), native("incr", incr)],
        BranchSeed {
            instrs: vec![
                Instr::call(Addr::Static(0), Addr::Arg),
                Instr::call(Addr::Static(1), Addr::Arg),
            ],
            stages: Some(vec![StageSeed {
                flows: vec![FlowSeed::new(0, 1), FlowSeed::new(1, 2)],
            }]),
            ..BranchSeed::default()
        },
    ));
    for machine in [machine(), parallel_machine()] {
        let fault = machine.call(&program.function(0), int(1)).unwrap_err();
        assert!(matches!(fault.kind(), FaultKind::Native(_)));
        assert_eq!(&*fault.trace()[0].entity, "broken_stage");
    }
}

#[test]
fn test_single_flow_stage_runs_inline() {
    // A one-flow stage never leaves the calling thread even on a parallel
    // machine; cross-check via thread identity.
    fn thread_name(_argument: Value, _io: &Interop) -> anyhow::Result<Value> {
        Ok(Value::host(format!("{:?}", std::thread::current().id())))
    }
    let program = link_one(function(
        "inline_stage",
        vec![native("thread_name", thread_name)],
        BranchSeed {
            instrs: vec![Instr::call(Addr::Static(0), Addr::Arg)],
            stages: Some(vec![StageSeed {
                flows: vec![FlowSeed::new(0, 1)],
            }]),
            ..BranchSeed::default()
        },
    ));
    let here = Value::host(format!("{:?}", std::thread::current().id()));
    let result = parallel_machine().call(&program.function(0), int(0)).unwrap();
    assert_eq!(result, here);
}

#[test]
fn test_nested_stages_share_a_single_worker() {
    // A flow whose call reaches another multi-flow stage must not wedge the
    // pool: with one worker and queue space left, both levels can only make
    // progress if waiting threads keep draining the queue.
    let inner = staged("nested_inner");
    let outer = function(
        "nested_outer",
        vec![StaticSeed::FunctionRef(0), native("incr", incr)],
        BranchSeed {
            instrs: vec![
                Instr::call(Addr::Static(0), Addr::Arg),
                Instr::call(Addr::Static(1), Addr::Arg),
                Instr::size(2),
                Instr::mov(Addr::Frame(0)),
                Instr::mov(Addr::Frame(1)),
                Instr::tuple(Addr::Frame(2)),
            ],
            stages: Some(vec![
                StageSeed {
                    flows: vec![FlowSeed::new(0, 1), FlowSeed::new(1, 2)],
                },
                StageSeed {
                    flows: vec![FlowSeed::new(2, 6)],
                },
            ]),
            ..BranchSeed::default()
        },
    );
    let program = link_all(vec![inner, outer]);
    let machine = Machine::new().with_pool(Arc::new(WorkerPool::new(1, 16)));

    let (tx, rx) = crossbeam::channel::bounded(1);
    let runner = std::thread::spawn(move || {
        let _ = tx.send(machine.call(&program.function(1), int(10)));
    });
    let result = rx
        .recv_timeout(std::time::Duration::from_secs(5))
        .expect("nested stages starved the pool")
        .unwrap();
    assert_eq!(
        result,
        Value::tuple(vec![Value::tuple(vec![int(12), int(40)]), int(11)])
    );
    runner.join().unwrap();
}

#[test]
fn test_overflowing_the_pool_still_completes() {
    // More flows than workers and queue slots; overflow work runs inline on
    // the submitting side and the stage still merges every flow.
    let flows = 12usize;
    let mut instrs = Vec::new();
    for _ in 0..flows {
        instrs.push(Instr::call(Addr::Static(0), Addr::Arg));
    }
    instrs.push(Instr::size(flows as u8));
    for i in 0..flows {
        instrs.push(Instr::mov(Addr::Frame(i as u16)));
    }
    instrs.push(Instr::tuple(Addr::Frame(flows as u16)));

    let first = StageSeed {
        flows: (0..flows).map(|i| FlowSeed::new(i, i + 1)).collect(),
    };
    let second = StageSeed {
        flows: vec![FlowSeed::new(flows, instrs.len())],
    };
    let program = link_one(function(
        "wide_stage",
        vec![native("incr", incr)],
        BranchSeed {
            instrs,
            stages: Some(vec![first, second]),
            ..BranchSeed::default()
        },
    ));
    let machine = Machine::new().with_pool(Arc::new(WorkerPool::new(1, 2)));
    let result = machine.call(&program.function(0), int(1)).unwrap();
    assert_eq!(result, Value::tuple(vec![int(2); flows]));
}
