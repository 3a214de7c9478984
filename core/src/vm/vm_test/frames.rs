use super::*;

#[test]
fn test_empty_trunk_produces_unit() {
    let program = link_one(function("empty", vec![], trunk(vec![])));
    assert_eq!(run(&program, 0, int(3)).unwrap(), Value::unit());
}

#[test]
fn test_mov_copies_the_argument() {
    let program = link_one(function("id", vec![], trunk(vec![Instr::mov(Addr::Arg)])));
    assert_eq!(run(&program, 0, int(7)).unwrap(), int(7));
}

#[test]
fn test_last_slot_is_the_result() {
    let program = link_one(function(
        "last",
        vec![StaticSeed::Value(int(1)), StaticSeed::Value(int(2))],
        trunk(vec![Instr::mov(Addr::Static(0)), Instr::mov(Addr::Static(1))]),
    ));
    assert_eq!(run(&program, 0, Value::unit()).unwrap(), int(2));
}

#[test]
fn test_tuple_from_vector_operands() {
    let program = link_one(function(
        "pair",
        vec![],
        trunk(vec![
            Instr::size(2),
            Instr::mov(Addr::Arg),
            Instr::mov(Addr::Arg),
            Instr::tuple(Addr::Frame(0)),
        ]),
    ));
    assert_eq!(
        run(&program, 0, int(4)).unwrap(),
        Value::tuple(vec![int(4), int(4)])
    );
}

#[test]
fn test_list_from_vector_operands() {
    let program = link_one(function(
        "triple",
        vec![StaticSeed::Value(int(1)), StaticSeed::Value(int(2)), StaticSeed::Value(int(3))],
        trunk(vec![
            Instr::size(3),
            Instr::mov(Addr::Static(0)),
            Instr::mov(Addr::Static(1)),
            Instr::mov(Addr::Static(2)),
            Instr::list(Addr::Frame(0)),
        ]),
    ));
    assert_eq!(
        run(&program, 0, Value::unit()).unwrap(),
        Value::list(vec![int(1), int(2), int(3)])
    );
}

#[test]
fn test_map_pairs_alternating_operands() {
    let program = link_one(function(
        "assoc",
        vec![
            StaticSeed::Value(int(1)),
            StaticSeed::Value(int(2)),
            StaticSeed::Value(int(3)),
            StaticSeed::Value(int(4)),
        ],
        trunk(vec![
            Instr::size(4),
            Instr::mov(Addr::Static(0)),
            Instr::mov(Addr::Static(1)),
            Instr::mov(Addr::Static(2)),
            Instr::mov(Addr::Static(3)),
            Instr::map_new(Addr::Frame(0)),
        ]),
    ));
    let result = run(&program, 0, Value::unit()).unwrap();
    match result {
        Value::Pairs(pairs) => {
            assert_eq!(pairs.len(), 2);
            assert_eq!(pairs[0], (int(1), int(2)));
            assert_eq!(pairs[1], (int(3), int(4)));
        }
        other => panic!("expected pairs, got {:?}", other),
    }
}

#[test]
fn test_map_with_odd_operand_count_faults() {
    let program = link_one(function(
        "odd",
        vec![StaticSeed::Value(int(1))],
        trunk(vec![
            Instr::size(1),
            Instr::mov(Addr::Static(0)),
            Instr::map_new(Addr::Frame(0)),
        ]),
    ));
    let fault = run(&program, 0, Value::unit()).unwrap_err();
    assert!(matches!(fault.kind(), FaultKind::Panic(_)));
}

#[test]
fn test_union_and_unwrap_roundtrip() {
    let program = link_one(function(
        "wrap",
        vec![],
        trunk(vec![Instr::union(2, Addr::Arg), Instr::unwrap(2, Addr::Frame(0))]),
    ));
    assert_eq!(run(&program, 0, int(11)).unwrap(), int(11));
}

#[test]
fn test_unwrap_wrong_variant_faults() {
    let program = link_one(function(
        "mismatch",
        vec![],
        trunk(vec![Instr::union(1, Addr::Arg), Instr::unwrap(2, Addr::Frame(0))]),
    ));
    let fault = run(&program, 0, int(0)).unwrap_err();
    assert!(matches!(fault.kind(), FaultKind::Panic(_)));
    assert_eq!(&*fault.trace()[0].entity, "mismatch");
    // Unwrap is the second instruction, so the second frame slot faulted.
    assert_eq!(fault.trace()[0].address, 1);
}

#[test]
fn test_field_reads_a_tuple_element() {
    let program = link_one(function(
        "second",
        vec![StaticSeed::Value(Value::tuple(vec![int(5), int(6)]))],
        trunk(vec![Instr::field(1, Addr::Static(0))]),
    ));
    assert_eq!(run(&program, 0, Value::unit()).unwrap(), int(6));
}

#[test]
fn test_field_out_of_range_faults() {
    let program = link_one(function(
        "oob",
        vec![StaticSeed::Value(Value::tuple(vec![int(5)]))],
        trunk(vec![Instr::field(7, Addr::Static(0))]),
    ));
    assert!(run(&program, 0, Value::unit()).is_err());
}

#[test]
fn test_size_marker_overrunning_the_frame_faults() {
    // The marker claims three operands but the frame ends after slot 2.
    let program = link_one(function(
        "overrun",
        vec![],
        trunk(vec![
            Instr::size(3),
            Instr::mov(Addr::Arg),
            Instr::tuple(Addr::Frame(0)),
        ]),
    ));
    let fault = run(&program, 0, int(1)).unwrap_err();
    assert!(matches!(fault.kind(), FaultKind::Panic(_)));
}

#[test]
fn test_vector_consumer_without_marker_faults() {
    let program = link_one(function(
        "nomarker",
        vec![],
        trunk(vec![Instr::mov(Addr::Arg), Instr::tuple(Addr::Frame(0))]),
    ));
    assert!(run(&program, 0, int(1)).is_err());
}
