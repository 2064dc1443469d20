use nanoshell::Interpreter;

fn main() {
    let code = match Interpreter::default().repl() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("nanoshell: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
