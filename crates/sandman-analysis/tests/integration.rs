//! # Integration Tests
//!
//! End-to-end policy construction over small programs, plus property
//! tests over randomly shaped control-flow graphs.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use proptest::prelude::*;
use sandman_analysis::ir::{BasicBlock, CallSite, Callee, Function, Instruction, Module, Terminator};
use sandman_analysis::{
    epsilon_closure, reduce, AutomatonBuilder, BuilderOptions, CorrelationIds, Injector, Label,
    StateSet, SymbolSet, TrapConfig,
};

fn call(name: &str) -> Instruction {
    Instruction::call(Callee::function(name))
}

fn block(name: &str, body: Vec<Instruction>, terminator: Terminator) -> BasicBlock {
    BasicBlock::new(name, body, terminator)
}

/// main -> helper_read_file -> {open, read}; main -> helper_exit -> exit.
fn helper_program() -> Module {
    Module::new(
        "main.c",
        vec![
            Function::new(
                "main",
                vec![block(
                    "entry",
                    vec![
                        call("printf"),
                        call("helper_read_file"),
                        call("printf"),
                        call("helper_exit"),
                    ],
                    Terminator::Return,
                )],
            ),
            Function::new(
                "helper_read_file",
                vec![block("entry", vec![call("open"), call("read")], Terminator::Return)],
            ),
            Function::new(
                "helper_exit",
                vec![block("entry", vec![call("exit")], Terminator::Unreachable)],
            ),
        ],
    )
}

fn symbols() -> SymbolSet {
    SymbolSet::from_names(["printf", "open", "read", "exit", "memset", "memcpy"])
}

// =============================================================================
// END-TO-END PROGRAMS
// =============================================================================

#[test]
fn test_helper_program_accepts_only_the_program_order() {
    let symbols = symbols();
    let module = helper_program();
    let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
        .build(&module, &mut CorrelationIds::default())
        .unwrap();
    let dfa = reduce(&nfa);

    let id = |function: &str, index: usize| nfa.call_sites()[&CallSite::new(function, "entry", index)];
    let printf_a = id("main", 0);
    let open = id("helper_read_file", 0);
    let read = id("helper_read_file", 1);
    let printf_b = id("main", 2);
    let exit = id("helper_exit", 0);

    let legal = dfa.run(&[printf_a, open, read, printf_b, exit]).unwrap();
    assert!(dfa.is_accepting(legal));

    // Out of order, skipped, or repeated calls have no transition.
    assert_eq!(dfa.run(&[open]), None);
    assert_eq!(dfa.run(&[printf_a, read]), None);
    assert_eq!(dfa.run(&[printf_a, open, read, printf_b, exit, exit]), None);
}

#[test]
fn test_loop_allows_repetition() {
    let symbols = symbols();
    let module = Module::new(
        "loop.c",
        vec![Function::new(
            "main",
            vec![
                block("entry", vec![call("open")], Terminator::jump("loop")),
                block("loop", vec![call("read")], Terminator::cond("loop", "done")),
                block("done", vec![call("printf")], Terminator::Return),
            ],
        )],
    );
    let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
        .build(&module, &mut CorrelationIds::default())
        .unwrap();
    let dfa = reduce(&nfa);

    let end = dfa.run(&[1, 2, 2, 2, 2, 3]).unwrap();
    assert!(dfa.is_accepting(end));
    assert!(!dfa.is_accepting(dfa.run(&[1, 2, 2]).unwrap()));
    assert_eq!(dfa.run(&[2]), None);
}

#[test]
fn test_loop_exiting_without_a_call_locks_out_after_first_pass() {
    let symbols = symbols();
    let module = Module::new(
        "loop.c",
        vec![Function::new(
            "main",
            vec![
                block("entry", vec![call("open")], Terminator::jump("loop")),
                block("loop", vec![call("read")], Terminator::cond("loop", "done")),
                block("done", vec![], Terminator::Return),
            ],
        )],
    );
    let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
        .build(&module, &mut CorrelationIds::default())
        .unwrap();
    let dfa = reduce(&nfa);

    // The state after the first read can already reach main-exit, so it
    // accepts and nothing may follow it.
    let after_read = dfa.run(&[1, 2]).unwrap();
    assert!(dfa.is_accepting(after_read));
    assert_eq!(dfa.next(after_read, 2), None);
}

#[test]
fn test_intrinsics_and_instrumentation() {
    let symbols = symbols();
    let mut module = Module::new(
        "intrinsic.c",
        vec![Function::new(
            "main",
            vec![block(
                "entry",
                vec![
                    Instruction::call(Callee::intrinsic("llvm.memset")),
                    Instruction::call(Callee::intrinsic("llvm.lifetime.start")),
                    Instruction::call(Callee::intrinsic("llvm.memcpy")),
                    call("printf"),
                ],
                Terminator::Return,
            )],
        )],
    );
    let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
        .build(&module, &mut CorrelationIds::starting_at(500))
        .unwrap();
    assert_eq!(nfa.alphabet(), BTreeSet::from([500, 501, 502]));

    let report = Injector::new(&symbols, TrapConfig::new())
        .instrument(&mut module, nfa.call_sites())
        .unwrap();
    assert_eq!(report.probes, 3);

    let body = &module.function("main").unwrap().blocks[0].instructions;
    let probes: Vec<usize> = body
        .iter()
        .enumerate()
        .filter(|(_, i)| i.as_call() == Some(&Callee::function("syscall")))
        .map(|(index, _)| index)
        .collect();
    // Each probe sits directly in front of the monitored call it reports.
    assert_eq!(probes, [0, 3, 5]);
    assert_eq!(body[1].as_call(), Some(&Callee::intrinsic("llvm.memset")));
    assert_eq!(body[4].as_call(), Some(&Callee::intrinsic("llvm.memcpy")));
    assert_eq!(body[6].as_call(), Some(&Callee::function("printf")));
}

// =============================================================================
// PROPERTIES OVER RANDOM CONTROL-FLOW GRAPHS
// =============================================================================

/// (instruction codes, terminator kind, branch target a, branch target b)
type BlockSeed = (Vec<u8>, u8, u8, u8);

fn module_from_seed(seed: &[Vec<BlockSeed>]) -> Module {
    let function_count = seed.len();
    let function_name = |i: usize| if i == 0 { "main".to_string() } else { format!("f{i}") };

    let functions = seed
        .iter()
        .enumerate()
        .map(|(fi, blocks)| {
            let block_name = |j: usize| if j == 0 { "entry".to_string() } else { format!("bb{j}") };
            let blocks = blocks
                .iter()
                .enumerate()
                .map(|(bj, (codes, kind, a, b))| {
                    let body = codes
                        .iter()
                        .map(|&code| match code {
                            0..=2 => call(&format!("m{code}")),
                            3 => call(&function_name(1 + fi % function_count)),
                            4 => Instruction::call(Callee::intrinsic("llvm.memset")),
                            5 => Instruction::call(Callee::intrinsic("llvm.va_start")),
                            6 => call("main"),
                            _ => Instruction::other("add"),
                        })
                        .collect();
                    let terminator = match kind {
                        0 => Terminator::Return,
                        1 => Terminator::Unreachable,
                        _ => {
                            let mut targets = vec![block_name(*a as usize % blocks.len())];
                            let other = block_name(*b as usize % blocks.len());
                            if !targets.contains(&other) {
                                targets.push(other);
                            }
                            Terminator::Branch { targets }
                        }
                    };
                    BasicBlock::new(block_name(bj), body, terminator)
                })
                .collect();
            Function::new(function_name(fi), blocks)
        })
        .collect();
    Module::new("random.c", functions)
}

fn module_strategy() -> impl Strategy<Value = Module> {
    let block = (prop::collection::vec(0u8..8, 0..4), 0u8..4, any::<u8>(), any::<u8>());
    prop::collection::vec(prop::collection::vec(block, 1..5), 1..4)
        .prop_map(|seed| module_from_seed(&seed))
}

fn random_symbols() -> SymbolSet {
    SymbolSet::from_names(["m0", "m1", "m2", "memset"])
}

proptest! {
    #[test]
    fn prop_closure_is_idempotent(module in module_strategy()) {
        let symbols = random_symbols();
        let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::default())
            .unwrap();

        let states: Vec<String> = nfa.edges().map(|(from, _, _)| from.to_string()).collect();
        for window in states.chunks(3) {
            let set: StateSet = window.iter().cloned().collect();
            let once = epsilon_closure(&nfa, &set);
            prop_assert!(once.is_superset(&set));
            prop_assert_eq!(epsilon_closure(&nfa, &once), once);
        }
    }

    #[test]
    fn prop_reduction_is_deterministic_and_locked_out(module in module_strategy()) {
        let symbols = random_symbols();
        let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::default())
            .unwrap();
        let dfa = reduce(&nfa);

        let mut seen = HashSet::new();
        for t in dfa.transitions() {
            prop_assert!(seen.insert((t.from, t.symbol)));
            prop_assert!(!dfa.is_accepting(t.from));
            prop_assert!((t.to as usize) < dfa.state_count());
        }
        let targets: HashSet<u32> = dfa.transitions().map(|t| t.to).collect();
        for state in 1..dfa.state_count() as u32 {
            prop_assert!(targets.contains(&state));
        }
        for state in 0..dfa.state_count() as u32 {
            let subset = dfa.subset(state).unwrap();
            prop_assert_eq!(&epsilon_closure(&nfa, subset), subset);
        }
    }

    #[test]
    fn prop_call_site_ids_are_unique(module in module_strategy(), first in 0u32..1_000_000) {
        let symbols = random_symbols();
        let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::starting_at(first))
            .unwrap();

        let monitored = module
            .definitions()
            .flat_map(|f| f.blocks.iter())
            .flat_map(|b| b.instructions.iter())
            .filter_map(Instruction::as_call)
            .filter(|callee| symbols.resolve(callee).is_some())
            .count();
        let ids: BTreeSet<u32> = nfa.call_sites().values().copied().collect();

        prop_assert_eq!(nfa.call_sites().len(), monitored);
        prop_assert_eq!(ids.len(), monitored);
        prop_assert_eq!(ids, nfa.alphabet());
    }

    #[test]
    fn prop_instrumentation_adds_one_probe_per_site(module in module_strategy()) {
        let symbols = random_symbols();
        let nfa = AutomatonBuilder::new(&symbols, BuilderOptions::new())
            .build(&module, &mut CorrelationIds::default())
            .unwrap();
        let sites: BTreeMap<CallSite, u32> = nfa.call_sites().clone();

        let mut instrumented = module.clone();
        let report = Injector::new(&symbols, TrapConfig::new())
            .instrument(&mut instrumented, &sites)
            .unwrap();

        prop_assert_eq!(report.probes, sites.len());
        prop_assert_eq!(instrumented.call_count(), module.call_count() + sites.len());
        let monitored_edges = nfa.edges().filter(|(_, label, _)| *label != Label::Epsilon).count();
        prop_assert_eq!(monitored_edges, sites.len());
    }
}
