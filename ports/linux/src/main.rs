// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use showtrigger_linux_port::cli::{Cli, Commands};
use showtrigger_linux_port::logger::init_tool_logger;
use showtrigger_linux_port::{app, tools};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = cli.log_level;

    match cli.command.unwrap_or_default() {
        Commands::Run { config } => app::run(&config, log_level),
        command => {
            init_tool_logger(log_level);
            tools::execute(command)
        }
    }
}
