//! Built-in sample suite
//!
//! A small catalog exercising every outcome the engine can report, used by
//! the `demo` command.

use serde_json::json;
use std::time::Duration;

use crate::lifecycle::{BindingCatalog, ClassBinding, ModuleBinding, ParamType, ScopeHook, TestInstance};
use crate::models::{assert, DataRow, ExpectedFailure, TestFault, TestUnitDescriptor};

pub const SAMPLE_MODULE: &str = "samples";

#[derive(Default)]
struct Arithmetic;

impl TestInstance for Arithmetic {}

#[derive(Default)]
struct Account {
    balance: i64,
}

impl TestInstance for Account {}

#[derive(Default)]
struct Network;

impl TestInstance for Network {}

fn divide(a: i64, b: i64) -> Result<i64, TestFault> {
    if b == 0 {
        return Err(TestFault::error("DivideByZero", "attempted to divide by zero")
            .derived_from("ArithmeticError"));
    }
    Ok(a / b)
}

fn arithmetic() -> ClassBinding {
    ClassBinding::builder::<Arithmetic>("Arithmetic")
        .default_constructor()
        .class_initialize(ScopeHook::sync("Arithmetic.Prepare", |ctx| {
            ctx.trace_line("arithmetic tables loaded");
            Ok(())
        }))
        .data_test(
            "Adds",
            vec![ParamType::Integer, ParamType::Integer, ParamType::Integer],
            |_, ctx, args| {
                let (a, b, expected) = (
                    args[0].as_i64().unwrap_or_default(),
                    args[1].as_i64().unwrap_or_default(),
                    args[2].as_i64().unwrap_or_default(),
                );
                ctx.write_line(&format!("{a} + {b}"));
                assert::are_equal(expected, a + b)
            },
        )
        .test("Divides", |_, _| divide(1, 0).map(|_| ()))
        .test("Pending", |_, _| Err(assert::inconclusive("rounding rules not settled")))
        .test("Legacy", |_, _| Err(assert::fail("should never run")))
        .build()
}

fn ledger() -> ClassBinding {
    ClassBinding::builder::<Account>("Ledger")
        .class_initialize(ScopeHook::sync("Ledger.Connect", |ctx| {
            ctx.write_line("ledger connected");
            Ok(())
        }))
        .class_cleanup(ScopeHook::sync("Ledger.Disconnect", |_| Ok(())))
        .test_initialize("Ledger.Open", |account, _| {
            account.balance = 100;
            Ok(())
        })
        .test_cleanup("Ledger.Close", |account, ctx| {
            ctx.trace_line(&format!("closing balance {}", account.balance));
            Ok(())
        })
        .build()
}

fn accounts() -> ClassBinding {
    ClassBinding::builder::<Account>("Accounts")
        .inherits("Ledger")
        .default_constructor()
        .test("Deposit", |account, ctx| {
            account.balance += 50;
            ctx.write_line(&format!("balance {}", account.balance));
            assert::are_equal(150, account.balance)
        })
        .build()
}

fn network() -> ClassBinding {
    ClassBinding::builder::<Network>("Network")
        .default_constructor()
        .async_test("Fetch", |_, ctx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.write_line("fetched 3 records");
                Ok::<(), TestFault>(())
            })
        })
        .async_test("Stalls", |_, ctx| {
            Box::pin(async move {
                ctx.cancellation_token().cancelled().await;
                ctx.trace_line("stall observed cancellation");
                Ok::<(), TestFault>(())
            })
        })
        .build()
}

fn exclusive() -> ClassBinding {
    ClassBinding::builder::<Arithmetic>("Exclusive")
        .default_constructor()
        .test("Migrate", |_, ctx| {
            ctx.write_line("migrating shared schema");
            Ok(())
        })
        .build()
}

/// Catalog backing the sample suite
pub fn sample_catalog() -> BindingCatalog {
    BindingCatalog::new()
        .module(
            ModuleBinding::new(SAMPLE_MODULE)
                .with_initialize(ScopeHook::sync("Samples.Setup", |ctx| {
                    ctx.trace_line("sample module ready");
                    Ok(())
                }))
                .with_cleanup(ScopeHook::sync("Samples.Teardown", |_| Ok(()))),
        )
        .class(SAMPLE_MODULE, arithmetic())
        .class(SAMPLE_MODULE, ledger())
        .class(SAMPLE_MODULE, accounts())
        .class(SAMPLE_MODULE, network())
        .class(SAMPLE_MODULE, exclusive())
}

/// Descriptors for the sample suite, in declaration order
pub fn sample_descriptors() -> Vec<TestUnitDescriptor> {
    let d = |class: &str, method: &str| TestUnitDescriptor::new(SAMPLE_MODULE, class, method);
    vec![
        d("Arithmetic", "Adds")
            .with_row(DataRow::new(vec![json!(1), json!(2), json!(3)]))
            .with_row(DataRow::new(vec![json!(2), json!(2), json!(4)]).named("two plus two"))
            .with_row(DataRow::new(vec![json!(2), json!("x"), json!(4)]))
            .with_row(DataRow::new(vec![json!(5), json!(5), json!(11)])),
        d("Arithmetic", "Divides")
            .expect_failure(ExpectedFailure::new("ArithmeticError").allow_derived()),
        d("Arithmetic", "Pending"),
        d("Arithmetic", "Legacy").ignored("replaced by Adds"),
        d("Arithmetic", "Missing"),
        d("Accounts", "Deposit").with_property("currency", "EUR"),
        d("Network", "Fetch").asynchronous(),
        d("Network", "Stalls")
            .asynchronous()
            .with_timeout(Duration::from_millis(50)),
        d("Exclusive", "Migrate").non_parallel(),
    ]
}
