//! Browser-side module registry emitted at the top of every script chunk.
//!
//! Chunks register module factories into a shared `__kiln__` registry and
//! entry chunks then require their root module. Modules are keyed by the
//! stable ids the assembler assigns, so a commons chunk loaded first can
//! supply modules to any entry chunk.

/// Registry runtime; a no-op when another chunk already installed it.
pub const RUNTIME: &str = r#"(function (global) {
  var kiln = global.__kiln__ || (global.__kiln__ = { modules: {}, cache: {} });
  if (kiln.require) return;

  function hotApi() {
    var hot = { accepted: false, callbacks: [], disposers: [] };
    hot.accept = function (cb) {
      hot.accepted = true;
      if (typeof cb === "function") hot.callbacks.push(cb);
    };
    hot.dispose = function (cb) {
      hot.disposers.push(cb);
    };
    return hot;
  }

  function require(id) {
    var cached = kiln.cache[id];
    if (cached) return cached.exports;
    var factory = kiln.modules[id];
    if (!factory) throw new Error("Cannot find module '" + id + "'");
    var module = (kiln.cache[id] = { id: id, exports: {}, hot: hotApi() });
    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }

  require.r = function (exports) {
    if (typeof Symbol !== "undefined" && Symbol.toStringTag) {
      Object.defineProperty(exports, Symbol.toStringTag, { value: "Module" });
    }
    Object.defineProperty(exports, "__esModule", { value: true });
  };
  require.d = function (exports, name, getter) {
    if (!Object.prototype.hasOwnProperty.call(exports, name)) {
      Object.defineProperty(exports, name, { enumerable: true, get: getter });
    }
  };
  require.n = function (mod) {
    return mod && mod.__esModule ? mod["default"] : mod;
  };
  require.x = function (exports, mod) {
    Object.keys(mod).forEach(function (key) {
      if (key !== "default") require.d(exports, key, function () { return mod[key]; });
    });
  };

  kiln.require = require;
  kiln.register = function (factories) {
    for (var id in factories) kiln.modules[id] = factories[id];
  };
  kiln.hotUpdate = function (factories) {
    var ids = Object.keys(factories);
    for (var i = 0; i < ids.length; i++) {
      var current = kiln.cache[ids[i]];
      if (current && !current.hot.accepted) return false;
    }
    ids.forEach(function (id) {
      var old = kiln.cache[id];
      if (old) old.hot.disposers.forEach(function (fn) { fn(); });
      delete kiln.cache[id];
      kiln.modules[id] = factories[id];
      if (old) {
        var next = require(id);
        old.hot.callbacks.forEach(function (fn) { fn(next); });
      }
    });
    return true;
  };
})(typeof self !== "undefined" ? self : this);
"#;

/// Support functions lowered syntax calls through the `babelHelpers` global.
///
/// Covers async functions, object rest and spread, and class fields and
/// private members. Async generator helpers are not included.
pub const HELPERS: &str = r#"(function (global) {
  var h = global.babelHelpers || (global.babelHelpers = {});
  if (h.asyncToGenerator) return;

  function asyncStep(gen, resolve, reject, next, thrown, key, arg) {
    var info, value;
    try {
      info = gen[key](arg);
      value = info.value;
    } catch (error) {
      reject(error);
      return;
    }
    if (info.done) resolve(value);
    else Promise.resolve(value).then(next, thrown);
  }
  h.asyncToGenerator = function (fn) {
    return function () {
      var self = this, args = arguments;
      return new Promise(function (resolve, reject) {
        var gen = fn.apply(self, args);
        function next(value) { asyncStep(gen, resolve, reject, next, thrown, "next", value); }
        function thrown(error) { asyncStep(gen, resolve, reject, next, thrown, "throw", error); }
        next(undefined);
      });
    };
  };

  h.toPrimitive = function (input, hint) {
    if (typeof input !== "object" || input === null) return input;
    var prim = input[Symbol.toPrimitive];
    if (prim !== undefined) {
      var res = prim.call(input, hint || "default");
      if (typeof res !== "object") return res;
      throw new TypeError("@@toPrimitive must return a primitive value.");
    }
    return (hint === "string" ? String : Number)(input);
  };
  h.toPropertyKey = function (arg) {
    var key = h.toPrimitive(arg, "string");
    return typeof key === "symbol" ? key : String(key);
  };
  h.defineProperty = function (obj, key, value) {
    key = h.toPropertyKey(key);
    if (key in obj) {
      Object.defineProperty(obj, key, { value: value, enumerable: true, configurable: true, writable: true });
    } else {
      obj[key] = value;
    }
    return obj;
  };

  function ownKeys(object, enumerableOnly) {
    var keys = Object.keys(object);
    if (Object.getOwnPropertySymbols) {
      var symbols = Object.getOwnPropertySymbols(object);
      if (enumerableOnly) {
        symbols = symbols.filter(function (sym) {
          return Object.getOwnPropertyDescriptor(object, sym).enumerable;
        });
      }
      keys.push.apply(keys, symbols);
    }
    return keys;
  }
  h.objectSpread2 = function (target) {
    for (var i = 1; i < arguments.length; i++) {
      var source = arguments[i] != null ? arguments[i] : {};
      if (i % 2) {
        ownKeys(Object(source), true).forEach(function (key) {
          h.defineProperty(target, key, source[key]);
        });
      } else {
        Object.defineProperties(target, Object.getOwnPropertyDescriptors(source));
      }
    }
    return target;
  };
  h.extends = function () {
    return Object.assign.apply(Object, arguments);
  };
  h.objectDestructuringEmpty = function (obj) {
    if (obj == null) throw new TypeError("Cannot destructure " + obj);
  };
  h.objectWithoutPropertiesLoose = function (source, excluded) {
    if (source == null) return {};
    var target = {};
    for (var key in source) {
      if (Object.prototype.hasOwnProperty.call(source, key) && excluded.indexOf(key) === -1) {
        target[key] = source[key];
      }
    }
    return target;
  };
  h.objectWithoutProperties = function (source, excluded) {
    if (source == null) return {};
    var target = h.objectWithoutPropertiesLoose(source, excluded);
    if (Object.getOwnPropertySymbols) {
      Object.getOwnPropertySymbols(source).forEach(function (sym) {
        if (excluded.indexOf(sym) === -1 && Object.prototype.propertyIsEnumerable.call(source, sym)) {
          target[sym] = source[sym];
        }
      });
    }
    return target;
  };

  function checkPrivateRedeclaration(obj, collection) {
    if (collection.has(obj)) {
      throw new TypeError("Cannot initialize the same private elements twice on an object");
    }
  }
  h.classPrivateFieldInitSpec = function (obj, map, value) {
    checkPrivateRedeclaration(obj, map);
    map.set(obj, value);
  };
  h.classPrivateMethodInitSpec = function (obj, set) {
    checkPrivateRedeclaration(obj, set);
    set.add(obj);
  };
  h.assertClassBrand = function (brand, receiver, value) {
    if (typeof brand === "function" ? brand === receiver : brand.has(receiver)) {
      return arguments.length < 3 ? receiver : value;
    }
    throw new TypeError("Private element is not present on this object");
  };
  h.classPrivateFieldGet2 = function (map, receiver) {
    return map.get(h.assertClassBrand(map, receiver));
  };
  h.classPrivateFieldSet2 = function (map, receiver, value) {
    map.set(h.assertClassBrand(map, receiver), value);
    return value;
  };
  var looseId = 0;
  h.classPrivateFieldLooseKey = function (name) {
    return "__private_" + looseId++ + "_" + name;
  };
  h.classPrivateFieldLooseBase = function (receiver, key) {
    if (!Object.prototype.hasOwnProperty.call(receiver, key)) {
      throw new TypeError("attempted to use private field on non-instance");
    }
    return receiver;
  };
  h.toSetter = function (fn, args, thisArg) {
    args = args || [];
    var index = args.length++;
    return Object.defineProperty({}, "_", {
      set: function (value) {
        args[index] = value;
        fn.apply(thisArg, args);
      }
    });
  };
  h.superPropGet = function (classArg, property, receiver, flags) {
    var value = Reflect.get(Object.getPrototypeOf(flags & 1 ? classArg.prototype : classArg), property, receiver);
    return flags & 2 && typeof value === "function"
      ? function (args) { return value.apply(receiver, args); }
      : value;
  };
  h.superPropSet = function (classArg, property, value, receiver, isStrict, prototype) {
    var ok = Reflect.set(Object.getPrototypeOf(prototype ? classArg.prototype : classArg), property, value, receiver);
    if (!ok && isStrict) throw new TypeError("failed to set property");
    return value;
  };
  h.readOnlyError = function (name) {
    throw new TypeError('"' + name + '" is read-only');
  };
  h.writeOnlyError = function (name) {
    throw new TypeError('"' + name + '" is write-only');
  };
  h.checkInRHS = function (value) {
    if (Object(value) !== value) {
      throw new TypeError("right-hand side of 'in' should be an object, got " + (value !== null ? typeof value : "null"));
    }
    return value;
  };
})(typeof self !== "undefined" ? self : this);
"#;

/// Render the factory map for `modules` (`(key, body)` pairs).
fn render_factories(out: &mut String, modules: &[(&str, &str)]) {
    out.push_str("{\n");
    for (key, body) in modules {
        out.push_str(&quote(key));
        out.push_str(": function (module, exports, __kiln_require__) {\n");
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("},\n");
    }
    out.push('}');
}

/// Render a script chunk registering `modules`, then requiring `entry`.
pub fn render_chunk(modules: &[(&str, &str)], entry: Option<&str>) -> String {
    let mut out = String::from(RUNTIME);
    out.push_str(HELPERS);
    out.push_str("__kiln__.register(");
    render_factories(&mut out, modules);
    out.push_str(");\n");

    if let Some(entry) = entry {
        out.push_str(&format!("__kiln__.require({});\n", quote(entry)));
    }

    out
}

/// Script applying replacement factories to a running page, reloading when
/// any replaced module has not accepted hot updates.
pub fn render_hot_update(modules: &[(&str, &str)]) -> String {
    let mut out = String::from("if (!__kiln__.hotUpdate(");
    render_factories(&mut out, modules);
    out.push_str(")) { location.reload(); }\n");
    out
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_registers_and_requires_entry() {
        let chunk = render_chunk(
            &[("./src/a.js", "module.exports = 1;"), ("./src/index.js", "__kiln_require__(\"./src/a.js\");\n")],
            Some("./src/index.js"),
        );

        assert!(chunk.starts_with(RUNTIME));
        assert!(chunk.contains("\"./src/a.js\": function (module, exports, __kiln_require__) {\nmodule.exports = 1;\n},"));
        assert!(chunk.ends_with("__kiln__.require(\"./src/index.js\");\n"));
    }

    #[test]
    fn chunk_installs_syntax_helpers() {
        let chunk = render_chunk(&[("./src/a.js", "exports.a = 1;")], None);
        let helpers = chunk.find("h.asyncToGenerator = function").unwrap();
        let register = chunk.find("__kiln__.register(").unwrap();
        assert!(helpers < register);
        assert!(chunk.contains("h.objectSpread2 = function"));
        assert!(chunk.contains("h.classPrivateFieldGet2 = function"));
    }

    #[test]
    fn shared_chunk_has_no_entry() {
        let chunk = render_chunk(&[("./src/c.js", "exports.c = 1;")], None);
        assert!(!chunk.contains("__kiln__.require("));
    }

    #[test]
    fn hot_update_falls_back_to_reload() {
        let update = render_hot_update(&[("./src/a.js", "module.hot.accept();")]);
        assert!(update.starts_with("if (!__kiln__.hotUpdate({"));
        assert!(update.ends_with(")) { location.reload(); }\n"));
    }
}
