use super::*;

fn two_way(name: &str) -> FunctionSeed {
    // switch over the argument's variant: 0 and 1 pick constant branches.
    function(
        name,
        vec![StaticSeed::Value(int(10)), StaticSeed::Value(int(20))],
        BranchSeed {
            instrs: vec![Instr::mov(Addr::Arg), Instr::switch(0, Addr::Frame(0))],
            tables: vec![DispatchTable::new().map_tag(0, 0).map_tag(1, 1)],
            branches: vec![
                trunk(vec![Instr::mov(Addr::Static(0))]),
                trunk(vec![Instr::mov(Addr::Static(1))]),
            ],
            ..BranchSeed::default()
        },
    )
}

#[test]
fn test_switch_selects_by_variant() {
    let program = link_one(two_way("pick"));
    assert_eq!(run(&program, 0, Value::union(0, Value::unit())).unwrap(), int(10));
    assert_eq!(run(&program, 0, Value::union(1, Value::unit())).unwrap(), int(20));
}

#[test]
fn test_switch_falls_back_to_the_default_branch() {
    let program = link_one(function(
        "fallback",
        vec![StaticSeed::Value(int(10)), StaticSeed::Value(int(99))],
        BranchSeed {
            instrs: vec![Instr::mov(Addr::Arg), Instr::switch(0, Addr::Frame(0))],
            tables: vec![DispatchTable::new().map_tag(0, 0).with_default(1)],
            branches: vec![
                trunk(vec![Instr::mov(Addr::Static(0))]),
                trunk(vec![Instr::mov(Addr::Static(1))]),
            ],
            ..BranchSeed::default()
        },
    ));
    assert_eq!(run(&program, 0, Value::union(5, Value::unit())).unwrap(), int(99));
}

#[test]
fn test_switch_on_unmapped_variant_faults() {
    let program = link_one(two_way("strict"));
    let fault = run(&program, 0, Value::union(3, Value::unit())).unwrap_err();
    assert!(matches!(fault.kind(), FaultKind::Panic(_)));
}

#[test]
fn test_switch_on_non_union_faults() {
    let program = link_one(two_way("typed"));
    assert!(run(&program, 0, int(1)).is_err());
}

#[test]
fn test_branches_read_pre_dispatch_slots() {
    let program = link_one(function(
        "payload",
        vec![],
        BranchSeed {
            instrs: vec![Instr::mov(Addr::Arg), Instr::switch(0, Addr::Frame(0))],
            tables: vec![DispatchTable::new().map_tag(0, 0).map_tag(1, 1)],
            branches: vec![
                trunk(vec![Instr::unwrap(0, Addr::Frame(0))]),
                trunk(vec![Instr::unwrap(1, Addr::Frame(0))]),
            ],
            ..BranchSeed::default()
        },
    ));
    assert_eq!(run(&program, 0, Value::union(0, int(42))).unwrap(), int(42));
    assert_eq!(run(&program, 0, Value::union(1, int(43))).unwrap(), int(43));
}

#[test]
fn test_nested_dispatch() {
    // The outer branch dispatches again on the payload it unwraps.
    let inner = BranchSeed {
        instrs: vec![Instr::unwrap(0, Addr::Frame(0)), Instr::switch(0, Addr::Frame(2))],
        tables: vec![DispatchTable::new().map_tag(0, 0).map_tag(1, 1)],
        branches: vec![
            trunk(vec![Instr::mov(Addr::Static(0))]),
            trunk(vec![Instr::mov(Addr::Static(1))]),
        ],
        ..BranchSeed::default()
    };
    let program = link_one(function(
        "nested",
        vec![StaticSeed::Value(int(10)), StaticSeed::Value(int(20))],
        BranchSeed {
            instrs: vec![Instr::mov(Addr::Arg), Instr::switch(0, Addr::Frame(0))],
            tables: vec![DispatchTable::new().map_tag(0, 0)],
            branches: vec![inner],
            ..BranchSeed::default()
        },
    ));
    let wrapped = |tag| Value::union(0, Value::union(tag, Value::unit()));
    assert_eq!(run(&program, 0, wrapped(0)).unwrap(), int(10));
    assert_eq!(run(&program, 0, wrapped(1)).unwrap(), int(20));
}

fn selector(name: &str) -> FunctionSeed {
    function(
        name,
        vec![
            StaticSeed::Value(int(1)),
            StaticSeed::Value(int(2)),
            StaticSeed::Value(int(3)),
        ],
        BranchSeed {
            instrs: vec![
                Instr::size(2),
                Instr::field(0, Addr::Arg),
                Instr::field(1, Addr::Arg),
                Instr::select(0, Addr::Frame(0)),
            ],
            tables: vec![
                DispatchTable::new()
                    .map_tags(&[0, 1], 0)
                    .map_tags(&[1, 0], 1)
                    .with_default(2),
            ],
            branches: vec![
                trunk(vec![Instr::mov(Addr::Static(0))]),
                trunk(vec![Instr::mov(Addr::Static(1))]),
                trunk(vec![Instr::mov(Addr::Static(2))]),
            ],
            ..BranchSeed::default()
        },
    )
}

#[test]
fn test_select_packs_multiple_scrutinees() {
    let program = link_one(selector("sel"));
    let arg = |a, b| {
        Value::tuple(vec![
            Value::union(a, Value::unit()),
            Value::union(b, Value::unit()),
        ])
    };
    assert_eq!(run(&program, 0, arg(0, 1)).unwrap(), int(1));
    assert_eq!(run(&program, 0, arg(1, 0)).unwrap(), int(2));
    assert_eq!(run(&program, 0, arg(1, 1)).unwrap(), int(3));
}

#[test]
fn test_select_with_non_union_scrutinee_faults() {
    let program = link_one(selector("sel_typed"));
    let arg = Value::tuple(vec![int(1), Value::union(0, Value::unit())]);
    assert!(run(&program, 0, arg).is_err());
}

#[test]
fn test_dispatch_result_lands_in_the_dispatch_slot() {
    // The instruction after the switch reads the branch's return value.
    let program = link_one(function(
        "landed",
        vec![StaticSeed::Value(int(10))],
        BranchSeed {
            instrs: vec![
                Instr::mov(Addr::Arg),
                Instr::switch(0, Addr::Frame(0)),
                Instr::union(4, Addr::Frame(1)),
            ],
            tables: vec![DispatchTable::new().map_tag(0, 0)],
            branches: vec![trunk(vec![Instr::mov(Addr::Static(0))])],
            ..BranchSeed::default()
        },
    ));
    let result = run(&program, 0, Value::union(0, Value::unit())).unwrap();
    assert_eq!(result, Value::union(4, int(10)));
}
