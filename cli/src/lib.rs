pub mod poisson_commands;
