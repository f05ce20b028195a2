#![no_main]
use agora_core::builder::Builder;
use agora_core::context::Context;
use agora_core::fixed::{Quantity, qty};
use agora_core::market::CommodityMarket;
use agora_core::recorder::NullBackend;
use agora_core::sim::SimConfig;
use agora_core::test_utils::*;
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

/// A structured setup or run operation.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    AddSource { rate: u8 },
    AddSink { rate: u8, capacity: u16 },
    AddMarket,
    Schedule { prototype: u8, tick: i8 },
    Step,
    Stop,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    duration: u8,
    ops: Vec<FuzzOp>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(mut ctx) = Context::new(
        SimConfig::new(0, u64::from(input.duration), 0.0),
        Box::new(NullBackend),
    ) else {
        return;
    };
    let prototypes = ["farm", "sink"];
    let _ = ctx.add_prototype("farm", Box::new(make_source("farm", 10.0)));
    let _ = ctx.add_prototype("sink", Box::new(make_sink("sink", 5.0, 50.0)));
    let Ok(builder) = ctx.deploy(Box::new(Builder::new("deployer"))) else {
        return;
    };

    let max_ops = input.ops.len().min(200);
    for (i, op) in input.ops[..max_ops].iter().enumerate() {
        match op {
            FuzzOp::AddSource { rate } => {
                let name = format!("source {i}");
                let _ = ctx.deploy(Box::new(make_source(&name, f64::from(*rate))));
            }
            FuzzOp::AddSink { rate, capacity } => {
                let name = format!("sink {i}");
                let _ = ctx.deploy(Box::new(make_sink(
                    &name,
                    f64::from(*rate),
                    f64::from(*capacity),
                )));
            }
            FuzzOp::AddMarket => {
                let _ = ctx.deploy(Box::new(CommodityMarket::new(&format!("market {i}"), "milk")));
            }
            FuzzOp::Schedule { prototype, tick } => {
                let name = prototypes[usize::from(*prototype) % prototypes.len()];
                let _ = ctx.schedule(builder, name, i64::from(*tick));
            }
            FuzzOp::Step => {
                let Ok(report) = ctx.step() else {
                    continue;
                };
                // No tick may move more than all facilities could offer.
                let moved: Quantity = report.transactions.iter().map(|t| t.quantity).sum();
                assert!(moved <= qty(255.0) * (ctx.active_count() as i64));
            }
            FuzzOp::Stop => ctx.stop(),
        }
    }
    let _ = ctx.run();
});
