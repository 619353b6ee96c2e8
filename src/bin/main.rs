// Copyright 2026 the stepscript authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::read_to_string;
use std::io::{stdin, stdout, Write};
use std::process::exit;

use clap::{App, Arg};

use stepscript::{with_global, ExecuteOptions, Runtime, RuntimeOptions, Scope};

fn main() {
    let matches = App::new("stepscript")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A step-wise, cooperatively scheduled script interpreter")
        .arg(
            Arg::with_name("FILE")
                .help("Script to run; starts a REPL when omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("verbosity")
                .short("v")
                .multiple(true)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::with_name("debug")
                .long("debug")
                .help("Trace every evaluator step"),
        )
        .arg(
            Arg::with_name("desc")
                .long("desc")
                .takes_value(true)
                .help("Name of the root execution in trace output"),
        )
        .get_matches();

    stderrlog::new()
        .verbosity(matches.occurrences_of("verbosity") as usize + 2)
        .init()
        .unwrap();

    let runtime = Runtime::new(RuntimeOptions {
        is_debug: matches.is_present("debug"),
    });
    let desc = matches.value_of("desc").unwrap_or("main").to_string();

    match matches.value_of("FILE") {
        Some(fname) => run_file(&runtime, fname, &desc),
        None => repl(&runtime, &desc),
    }
}

fn repl(runtime: &Runtime, desc: &str) {
    let mut input = String::new();
    let mut line = 0u64;
    loop {
        print!(">> ");
        stdout().flush().unwrap();
        input.clear();
        if stdin().read_line(&mut input).unwrap() == 0 {
            break;
        }
        if input.trim().to_lowercase() == "exit" {
            break;
        }
        if input.trim().is_empty() {
            continue;
        }
        line += 1;
        let scope = with_global(Scope::new());
        let options = ExecuteOptions::new(scope).desc(format!("{}:{}", desc, line));
        match runtime
            .execute(&input, options)
            .and_then(|execution| execution.wait())
        {
            Ok(v) => println!("=> {}", v),
            Err(e) => println!("!! {}", e),
        }
    }
}

fn run_file(runtime: &Runtime, fname: &str, desc: &str) {
    let contents = match read_to_string(fname) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("cannot read {}: {}", fname, e);
            exit(1);
        }
    };
    let scope = with_global(Scope::new());
    let options = ExecuteOptions::new(scope).desc(desc);
    match runtime
        .execute(&contents, options)
        .and_then(|execution| execution.wait())
    {
        Ok(_) => (),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(1);
        }
    }
}
